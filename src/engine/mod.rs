// src/engine/mod.rs

//! Orchestration engine for checkdag.
//!
//! This module drives the recurring start / reschedule cycle of the
//! scheduling groups built by [`crate::dag::Scheduler`]. The runtime reacts
//! to:
//! - a group's timer firing
//! - a group's run completing
//! - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::time::Duration;

use crate::dag::TaskId;

/// Events flowing into the runtime from timers, the executor and signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// The group's delay elapsed; it should be started.
    GroupDue { group: TaskId },
    /// A run of the group settled (success or failure).
    GroupCompleted { group: TaskId },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Static facts about a group the core needs to plan its runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub id: TaskId,
    pub label: String,
    /// Zero means the group runs once.
    pub repeat: Duration,
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
