// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! Two layers of errors live here:
//! - [`CheckdagError`]: fatal errors that abort startup (bad config, a host
//!   that does not resolve, a command file that cannot be opened).
//! - [`Failure`]: the typed, cloneable result of a single failed run. It is
//!   stored as a task's cached result and flows through the dependency graph
//!   instead of being raised across the scheduler loop.

use std::fmt;

use thiserror::Error;

use crate::types::State;

#[derive(Error, Debug)]
pub enum CheckdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialisation error: {0}")]
    InitError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cycle detected in task graph: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CheckdagError>;

/// Specific reason a probe failed to produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeErrorKind {
    Timeout,
    ConnectionRefused,
    ConnectionLost,
    Protocol,
    Process,
}

/// Classification of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Threshold or filter reported a WARNING.
    Warning,
    /// Threshold or filter reported a CRITICAL.
    Critical,
    /// The check could not decide (evaluation errors and the like).
    Unknown,
    /// A probe could not talk to its target.
    Probe(ProbeErrorKind),
    /// A subtask of a test failed; the report looks at the subtasks.
    ChildFailed,
    /// Anything nobody expected, including panics caught at the task boundary.
    Unhandled,
}

/// A failed run result.
///
/// `result` holds the value that triggered the failure (e.g. the number that
/// crossed a threshold), `detail` any lower level error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    pub result: Option<String>,
    pub detail: Option<String>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            result: None,
            detail: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Warning, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Critical, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unknown, message)
    }

    pub fn probe(kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Probe(kind), message)
    }

    pub fn unhandled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unhandled, message)
    }

    pub fn child_failed() -> Self {
        Self::new(FailureKind::ChildFailed, "a subtask failed")
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn with_detail(mut self, detail: impl fmt::Display) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    /// Report state this failure maps to.
    pub fn state(&self) -> State {
        match self.kind {
            FailureKind::Warning => State::Warning,
            FailureKind::Critical | FailureKind::Probe(_) => State::Critical,
            FailureKind::Unknown | FailureKind::ChildFailed | FailureKind::Unhandled => {
                State::Unknown
            }
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Failure {}
