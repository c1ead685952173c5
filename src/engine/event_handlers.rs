// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dag::TaskId;
use crate::engine::GroupInfo;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Start a run of this group now.
    StartGroup(TaskId),
    /// Deliver `GroupDue` for this group after `delay`.
    ScheduleGroup { group: TaskId, delay: Duration },
    /// Request that the process exits (nothing left to run).
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn running(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }
}

/// Per-group bookkeeping.
#[derive(Debug, Clone)]
pub struct GroupSlot {
    pub info: GroupInfo,
    pub running: bool,
    pub scheduled: bool,
}

/// Handle a group whose timer fired.
///
/// A group that is still running from its previous start is skipped; its
/// completion reschedules it.
pub fn handle_group_due(groups: &mut BTreeMap<TaskId, GroupSlot>, group: TaskId) -> CoreStep {
    let Some(slot) = groups.get_mut(&group) else {
        debug!(group, "timer fired for an unregistered group; ignoring");
        return finish_if_idle(groups, Vec::new());
    };
    slot.scheduled = false;

    if slot.running {
        warn!(group = %slot.info.label, "group is due but still running; skipping this start");
        return CoreStep::running(Vec::new());
    }

    slot.running = true;
    debug!(group = %slot.info.label, "starting group");
    CoreStep::running(vec![CoreCommand::StartGroup(group)])
}

/// Handle a finished run: reschedule after the group's own repeat, or
/// unregister a run-once group.
pub fn handle_group_completion(
    groups: &mut BTreeMap<TaskId, GroupSlot>,
    group: TaskId,
) -> CoreStep {
    let mut commands = Vec::new();

    match groups.get_mut(&group) {
        Some(slot) => {
            slot.running = false;
            if slot.info.repeat.is_zero() {
                info!(group = %slot.info.label, "group is not scheduled to run again; unregistering");
                groups.remove(&group);
            } else {
                debug!(
                    group = %slot.info.label,
                    delay_ms = slot.info.repeat.as_millis() as u64,
                    "rescheduling group"
                );
                slot.scheduled = true;
                commands.push(CoreCommand::ScheduleGroup {
                    group,
                    delay: slot.info.repeat,
                });
            }
        }
        None => debug!(group, "completion for an unregistered group; ignoring"),
    }

    finish_if_idle(groups, commands)
}

/// Exit once no group is left to run.
pub fn finish_if_idle(
    groups: &BTreeMap<TaskId, GroupSlot>,
    mut commands: Vec<CoreCommand>,
) -> CoreStep {
    if groups.is_empty() {
        info!("no groups left to run");
        commands.push(CoreCommand::RequestExit);
        return CoreStep {
            commands,
            keep_running: false,
        };
    }
    CoreStep::running(commands)
}
