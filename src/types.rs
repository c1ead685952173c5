// src/types.rs

//! Small shared enums.

use std::fmt;

/// Final state of a check, ordered from best to worst.
///
/// The discriminant is the numeric state id used by the command protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    Ok = 0,
    Warning = 1,
    Critical = 2,
    Unknown = 3,
}

impl State {
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Ok => "OK",
            State::Warning => "WARNING",
            State::Critical => "CRITICAL",
            State::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of work a task node performs. Used for stats and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskKind {
    Runnable,
    Query,
    Test,
    Group,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Runnable,
        TaskKind::Query,
        TaskKind::Test,
        TaskKind::Group,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Runnable => "Runnable",
            TaskKind::Query => "Query",
            TaskKind::Test => "Test",
            TaskKind::Group => "Group",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
