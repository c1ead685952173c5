// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - arming timers for `ScheduleGroup`
//! - handing groups to the executor for `StartGroup`
//! - handling Ctrl+C / shutdown
//!
//! The core is unit tested without any Tokio, channels or probes.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::dag::TaskId;
use crate::engine::event_handlers::{
    CoreCommand, CoreStep, GroupSlot, finish_if_idle, handle_group_completion, handle_group_due,
};
use crate::engine::{GroupInfo, RuntimeEvent};

/// Pure core runtime state.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug, Default)]
pub struct CoreRuntime {
    groups: BTreeMap<TaskId, GroupSlot>,
}

impl CoreRuntime {
    pub fn new(groups: impl IntoIterator<Item = GroupInfo>) -> Self {
        let groups = groups
            .into_iter()
            .map(|info| {
                (
                    info.id,
                    GroupSlot {
                        info,
                        running: false,
                        scheduled: false,
                    },
                )
            })
            .collect();
        Self { groups }
    }

    /// Arm the first run of every group. `delays` comes from the scheduler's
    /// fanout plan; groups missing from it start immediately.
    pub fn seed(&mut self, delays: &[(TaskId, Duration)]) -> CoreStep {
        let mut commands = Vec::with_capacity(self.groups.len());
        for (id, slot) in self.groups.iter_mut() {
            let delay = delays
                .iter()
                .find(|(gid, _)| gid == id)
                .map(|(_, d)| *d)
                .unwrap_or(Duration::ZERO);
            slot.scheduled = true;
            commands.push(CoreCommand::ScheduleGroup { group: *id, delay });
        }
        finish_if_idle(&self.groups, commands)
    }

    /// Number of groups still registered.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn is_running(&self, group: TaskId) -> bool {
        self.groups.get(&group).is_some_and(|g| g.running)
    }

    pub fn is_scheduled(&self, group: TaskId) -> bool {
        self.groups.get(&group).is_some_and(|g| g.scheduled)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::GroupDue { group } => handle_group_due(&mut self.groups, group),
            RuntimeEvent::GroupCompleted { group } => {
                handle_group_completion(&mut self.groups, group)
            }
            RuntimeEvent::ShutdownRequested => CoreStep {
                commands: Vec::new(),
                keep_running: false,
            },
        }
    }
}
