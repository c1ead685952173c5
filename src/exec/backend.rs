// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to a `GroupExecutor` instead of spawning runs itself.
//! This makes it easy to swap in a fake executor in tests.
//!
//! - `TokioGroupExecutor` is the default implementation. It spawns
//!   `group.start()` on the current runtime and sends `GroupCompleted` once
//!   the run settles.
//! - Tests can provide their own `GroupExecutor` that, for example, records
//!   which groups were started and directly emits `GroupCompleted` events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dag::Runnable;
use crate::engine::RuntimeEvent;
use crate::errors::Result;

/// Trait abstracting how due groups are run.
pub trait GroupExecutor: Send {
    /// Start a run of `group`. Must not wait for the run to finish.
    fn start_group(
        &mut self,
        group: Arc<Runnable>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production executor: one tokio task per run.
pub struct TokioGroupExecutor {
    tx: mpsc::Sender<RuntimeEvent>,
}

impl TokioGroupExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self { tx: runtime_tx }
    }
}

impl GroupExecutor for TokioGroupExecutor {
    fn start_group(
        &mut self,
        group: Arc<Runnable>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the spawned task doesn't borrow `self`.
        let tx = self.tx.clone();

        Box::pin(async move {
            tokio::spawn(async move {
                let result = group.start().await;
                debug!(group = %group, ok = result.is_ok(), "group run settled");
                if tx
                    .send(RuntimeEvent::GroupCompleted { group: group.id() })
                    .await
                    .is_err()
                {
                    warn!(group = %group, "runtime gone; dropping completion");
                }
            });
            Ok(())
        })
    }
}
