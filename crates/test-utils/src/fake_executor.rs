use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use checkdag::dag::{Runnable, TaskId};
use checkdag::engine::RuntimeEvent;
use checkdag::errors::Result;
use checkdag::exec::GroupExecutor;
use tokio::sync::mpsc;

/// A fake executor that:
/// - records which groups were started, by id
/// - never runs the group's work
/// - immediately reports `GroupCompleted` for each started group.
pub struct RecordingExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    started: Arc<Mutex<Vec<TaskId>>>,
}

impl RecordingExecutor {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        started: Arc<Mutex<Vec<TaskId>>>,
    ) -> Self {
        Self { runtime_tx, started }
    }
}

impl GroupExecutor for RecordingExecutor {
    fn start_group(
        &mut self,
        group: Arc<Runnable>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let started = Arc::clone(&self.started);

        Box::pin(async move {
            started.lock().unwrap().push(group.id());

            tx.send(RuntimeEvent::GroupCompleted { group: group.id() })
                .await
                .map_err(anyhow::Error::from)?;
            Ok(())
        })
    }
}
