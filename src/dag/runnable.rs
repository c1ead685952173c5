// src/dag/runnable.rs

//! The schedulable unit of work.
//!
//! A [`Runnable`] owns a repeat interval, the result of its last run and a
//! handle to its in-flight execution. Queries, tests and scheduling groups
//! are all `Runnable`s that differ only in the [`Work`] they perform.
//!
//! [`Runnable::start`] is the single entry point and is safe to call from any
//! number of dependents:
//! 1. a sharding skip returns an empty success and leaves the cache alone,
//! 2. a run already in flight is joined rather than started again,
//! 3. a result younger than `repeat` is returned from the cache,
//! 4. otherwise every dependency is started and awaited, then this task's own
//!    work runs, then the result is cached.

use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::cluster::ShardSlot;
use crate::errors::{Failure, FailureKind};
use crate::types::TaskKind;

/// Raw value produced by a task.
pub type Value = String;

/// Outcome of one run of a task.
pub type RunResult = std::result::Result<Value, Failure>;

/// Handle to a (possibly shared) run of a task.
pub type RunFuture = Shared<BoxFuture<'static, RunResult>>;

/// Stable identity of a task node.
pub type TaskId = u64;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Lock a std mutex, ignoring poisoning. Every critical section in this crate
/// is a plain field update that cannot leave state half written.
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The work a task performs once all of its dependencies have settled.
///
/// `dependencies` holds the results of the task's dependencies, in the order
/// they were added.
#[async_trait::async_trait]
pub trait Work: Send + Sync {
    async fn run(&self, dependencies: Vec<RunResult>) -> RunResult;
}

#[derive(Default)]
struct RunState {
    last_run: Option<Instant>,
    cached: Option<RunResult>,
    in_flight: Option<RunFuture>,
}

/// A node in the task graph.
pub struct Runnable {
    id: TaskId,
    label: String,
    kind: TaskKind,
    host: Mutex<Option<String>>,
    repeat: Mutex<Duration>,
    dependencies: Mutex<Vec<Arc<Runnable>>>,
    state: Mutex<RunState>,
    work: Option<Arc<dyn Work>>,
    shard: OnceLock<ShardSlot>,
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runnable")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("repeat", &self.repeat())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}>", self.kind, self.label)
    }
}

impl Runnable {
    pub fn new(
        label: impl Into<String>,
        kind: TaskKind,
        repeat: Duration,
        host: Option<String>,
        work: Option<Arc<dyn Work>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            kind,
            host: Mutex::new(host),
            repeat: Mutex::new(repeat),
            dependencies: Mutex::new(Vec::new()),
            state: Mutex::new(RunState::default()),
            work,
            shard: OnceLock::new(),
        })
    }

    /// A task with no work of its own. Mostly useful for grouping and tests.
    pub fn plain(label: impl Into<String>, repeat: Duration) -> Arc<Self> {
        Self::new(label, TaskKind::Runnable, repeat, None, None)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn host(&self) -> Option<String> {
        lock(&self.host).clone()
    }

    pub fn set_host(&self, host: Option<String>) {
        *lock(&self.host) = host;
    }

    /// Repeat interval; zero means "run once".
    pub fn repeat(&self) -> Duration {
        *lock(&self.repeat)
    }

    pub fn set_repeat(&self, repeat: Duration) {
        *lock(&self.repeat) = repeat;
    }

    /// Attach the sharding slot. Only the first call has an effect.
    pub fn set_shard(&self, slot: ShardSlot) {
        if self.shard.set(slot).is_err() {
            warn!(task = %self, "shard slot already assigned; ignoring");
        }
    }

    pub fn shard(&self) -> Option<&ShardSlot> {
        self.shard.get()
    }

    /// Declare that `self` depends on `dep`. Adding the same node twice is a
    /// no-op.
    pub fn add_dependency(&self, dep: Arc<Runnable>) {
        let mut deps = lock(&self.dependencies);
        if !deps.iter().any(|d| d.id == dep.id) {
            deps.push(dep);
        }
    }

    pub fn add_dependencies(&self, group: impl IntoIterator<Item = Arc<Runnable>>) {
        for dep in group {
            self.add_dependency(dep);
        }
    }

    /// Direct dependencies, in insertion order.
    pub fn dependencies(&self) -> Vec<Arc<Runnable>> {
        lock(&self.dependencies).clone()
    }

    /// Every node reachable through dependency edges, each listed once.
    ///
    /// Terminates on cyclic graphs; cycles are rejected separately at
    /// registration.
    pub fn all_dependencies(&self) -> Vec<Arc<Runnable>> {
        let mut seen = HashSet::new();
        seen.insert(self.id);
        let mut out = Vec::new();
        let mut stack = self.dependencies();
        stack.reverse();

        while let Some(dep) = stack.pop() {
            if !seen.insert(dep.id) {
                continue;
            }
            let mut children = dep.dependencies();
            children.reverse();
            stack.extend(children);
            out.push(dep);
        }
        out
    }

    /// Result of the last completed run, if any.
    pub fn last_result(&self) -> Option<RunResult> {
        lock(&self.state).cached.clone()
    }

    pub fn last_run(&self) -> Option<Instant> {
        lock(&self.state).last_run
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).in_flight.is_some()
    }

    /// Start this task, or join / reuse a run that makes starting unnecessary.
    pub fn start(self: &Arc<Self>) -> RunFuture {
        if let Some(slot) = self.shard.get() {
            if !slot.should_run() {
                trace!(task = %self, index = slot.index, "not in this peer's shard; skipping");
                return ready(Ok(Value::new()));
            }
        }

        let mut state = lock(&self.state);

        if let Some(running) = &state.in_flight {
            trace!(task = %self, "already running; joining");
            return running.clone();
        }

        if let (Some(last), Some(cached)) = (state.last_run, &state.cached) {
            let repeat = self.repeat();
            // An expiry past the end of the clock never comes.
            let fresh = last
                .checked_add(repeat)
                .is_none_or(|expires| expires > Instant::now());
            if repeat.is_zero() || fresh {
                debug!(task = %self, "result still fresh; skipping start");
                return ready(cached.clone());
            }
        }

        let this = Arc::clone(self);
        let run = async move { this.execute().await }.boxed().shared();
        state.in_flight = Some(run.clone());
        run
    }

    async fn execute(self: Arc<Self>) -> RunResult {
        let deps = self.dependencies();
        if !deps.is_empty() {
            debug!(task = %self, count = deps.len(), "starting dependencies");
        }
        let results = future::join_all(deps.iter().map(|d| d.start())).await;

        // Always yield once so long chains of already-settled dependencies
        // cannot grow the stack.
        tokio::task::yield_now().await;

        debug!(task = %self, "starting");
        let result = match &self.work {
            Some(work) => match AssertUnwindSafe(work.run(results)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(Failure::unhandled("task panicked")
                    .with_detail(panic_message(panic.as_ref()))),
            },
            None => Ok(Value::new()),
        };

        self.done(&result);
        result
    }

    fn done(&self, result: &RunResult) {
        {
            let mut state = lock(&self.state);
            state.cached = Some(result.clone());
            state.last_run = Some(Instant::now());
            state.in_flight = None;
        }

        match result {
            Ok(value) => debug!(task = %self, result = %value, "finished"),
            Err(failure) => log_failure(self, failure),
        }
    }
}

fn log_failure(task: &Runnable, failure: &Failure) {
    match failure.kind {
        FailureKind::Unhandled => error!(
            task = %task,
            error = %failure,
            detail = failure.detail.as_deref().unwrap_or(""),
            "unhandled error"
        ),
        FailureKind::Probe(kind) => warn!(
            task = %task,
            ?kind,
            error = %failure,
            "probe failed"
        ),
        _ => debug!(task = %task, state = %failure.state(), error = %failure, "finished with failure"),
    }
}

fn ready(result: RunResult) -> RunFuture {
    future::ready(result).boxed().shared()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
