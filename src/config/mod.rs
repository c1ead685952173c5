// src/config/mod.rs

//! Configuration loading and validation for checkdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate filters, thresholds, intervals and cluster ids (`validate.rs`).
//! - Build tests and shared queries from a validated config (`assemble.rs`).

pub mod assemble;
pub mod interval;
pub mod loader;
pub mod model;
pub mod validate;

pub use assemble::{build_test, build_tests};
pub use interval::{IntervalSpec, parse_interval};
pub use loader::{default_config_path, load_and_validate, load_from_path, parse_and_validate};
pub use model::{
    ClusterSection, ConfigFile, DefaultsSection, RawConfigFile, SchedulerSection, TestConfig,
};
