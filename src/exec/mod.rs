// src/exec/mod.rs

//! Group execution layer.
//!
//! The runtime hands due groups to a [`GroupExecutor`], which starts them
//! through the normal [`Runnable`](crate::dag::Runnable) protocol and reports
//! back with `RuntimeEvent::GroupCompleted`.
//!
//! - [`backend`] provides the `GroupExecutor` trait and the
//!   `TokioGroupExecutor` used in production, which tests can replace with a
//!   fake implementation.

pub mod backend;

pub use backend::{GroupExecutor, TokioGroupExecutor};
