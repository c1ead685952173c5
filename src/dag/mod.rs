// src/dag/mod.rs

//! Task graph and scheduling.
//!
//! - [`runnable`] holds the schedulable unit and its start / throttle protocol.
//! - [`graph`] checks that the dependency graph stays acyclic.
//! - [`scheduler`] merges top-level tasks into groups and plans first runs.
//! - [`latency`] is the scheduler's own liveness self-check.

pub mod graph;
pub mod latency;
pub mod runnable;
pub mod scheduler;

pub use graph::TaskGraph;
pub use latency::{LatencyHistory, LatencySummary, spawn_latency_monitor};
pub use runnable::{RunFuture, RunResult, Runnable, TaskId, Value, Work};
pub use scheduler::{InitialRun, Scheduler, SchedulerStats, TaskStats};
