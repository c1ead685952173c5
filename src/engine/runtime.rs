// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::{Runnable, TaskId};
use crate::errors::Result;
use crate::exec::GroupExecutor;

use super::core::CoreRuntime;
use super::{CoreCommand, CoreStep, RuntimeEvent};

/// Drives the groups in response to `RuntimeEvent`s and delegates starting
/// them to a `GroupExecutor`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. This struct handles async IO: reading events from
/// channels, arming timers and dispatching groups to the executor.
pub struct Runtime<E: GroupExecutor> {
    core: CoreRuntime,
    groups: HashMap<TaskId, Arc<Runnable>>,
    event_tx: mpsc::Sender<RuntimeEvent>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
}

impl<E: GroupExecutor> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("groups", &self.groups.len())
            .finish_non_exhaustive()
    }
}

impl<E: GroupExecutor> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        groups: impl IntoIterator<Item = Arc<Runnable>>,
        event_tx: mpsc::Sender<RuntimeEvent>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
    ) -> Self {
        Self {
            core,
            groups: groups.into_iter().map(|g| (g.id(), g)).collect(),
            event_tx,
            event_rx,
            executor,
        }
    }

    /// Main event loop.
    ///
    /// - Executes the seed step (first-run timers from the fanout plan).
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Feeds them into the core runtime.
    /// - Executes commands returned by the core (timers, starts, exit).
    pub async fn run(mut self, seed: CoreStep) -> Result<()> {
        info!(groups = self.groups.len(), "checkdag runtime started");

        if self.apply(seed).await? {
            loop {
                let event = match self.event_rx.recv().await {
                    Some(e) => e,
                    None => {
                        info!("runtime event channel closed; exiting");
                        break;
                    }
                };

                debug!(?event, "runtime received event");

                let step = self.core.step(event);
                if !self.apply(step).await? {
                    break;
                }
            }
        }

        info!("runtime exiting");
        Ok(())
    }

    /// Execute a step's commands; returns whether to keep running.
    async fn apply(&mut self, step: CoreStep) -> Result<bool> {
        for command in step.commands {
            self.execute_command(command).await?;
        }
        if !step.keep_running {
            info!("core requested exit; stopping runtime");
        }
        Ok(step.keep_running)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::StartGroup(id) => match self.groups.get(&id) {
                Some(group) => self.executor.start_group(Arc::clone(group)).await?,
                None => warn!(group = id, "core asked to start an unknown group"),
            },
            CoreCommand::ScheduleGroup { group, delay } => self.arm_timer(group, delay),
            CoreCommand::RequestExit => {
                // keep_running is already false in this case; just log it.
                info!("core issued RequestExit command");
            }
        }
        Ok(())
    }

    fn arm_timer(&self, group: TaskId, delay: Duration) {
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = tx.send(RuntimeEvent::GroupDue { group }).await;
        });
    }
}
