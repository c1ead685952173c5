//! Fake work and probes with observable side effects.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use checkdag::dag::{RunResult, Runnable, Work};
use checkdag::errors::{Failure, Result};
use checkdag::query::{Probe, ProbeRegistry, QueryConfig};
use checkdag::types::TaskKind;

/// Work that counts its runs and returns a fixed result, optionally after a
/// delay (use with paused tokio time).
pub struct CountingWork {
    runs: Arc<AtomicUsize>,
    delay: Duration,
    result: RunResult,
}

impl CountingWork {
    pub fn new(result: RunResult) -> Self {
        Self {
            runs: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            result,
        }
    }

    pub fn ok(value: &str) -> Self {
        Self::new(Ok(value.to_string()))
    }

    pub fn failing(failure: Failure) -> Self {
        Self::new(Err(failure))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shared run counter; grab it before handing the work to a task.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.runs)
    }
}

#[async_trait::async_trait]
impl Work for CountingWork {
    async fn run(&self, _dependencies: Vec<RunResult>) -> RunResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}

/// Work that panics, for checking the task boundary.
pub struct PanickingWork;

#[async_trait::async_trait]
impl Work for PanickingWork {
    async fn run(&self, _dependencies: Vec<RunResult>) -> RunResult {
        panic!("boom");
    }
}

/// A task of kind `Runnable` running `work`, returning its run counter.
pub fn counting_task(
    label: &str,
    repeat: Duration,
    work: CountingWork,
) -> (Arc<Runnable>, Arc<AtomicUsize>) {
    let counter = work.counter();
    let task = Runnable::new(label, TaskKind::Runnable, repeat, None, Some(Arc::new(work)));
    (task, counter)
}

pub fn runs(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// A probe returning a fixed result.
pub struct StaticProbe {
    result: RunResult,
}

impl StaticProbe {
    pub fn new(result: RunResult) -> Self {
        Self { result }
    }
}

#[async_trait::async_trait]
impl Probe for StaticProbe {
    async fn run(&self) -> RunResult {
        self.result.clone()
    }
}

/// A probe returning its `data` parameter and counting every call on a
/// counter shared by all probes built from the same registry entry.
pub struct CountingProbe {
    data: String,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Probe for CountingProbe {
    async fn run(&self) -> RunResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.data.clone())
    }
}

/// Builtin registry plus a `counting` probe type. `delay` is read from the
/// `delay_ms` parameter.
pub fn counting_registry() -> (ProbeRegistry, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ProbeRegistry::with_builtins();
    let shared = Arc::clone(&calls);
    registry.register("counting", move |conf: &QueryConfig| -> Result<Arc<dyn Probe>> {
        let delay = conf
            .param_str("delay_ms")
            .and_then(|ms| ms.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO);
        Ok(Arc::new(CountingProbe {
            data: conf.param_str("data").unwrap_or_default(),
            delay,
            calls: Arc::clone(&shared),
        }))
    });
    (registry, calls)
}

/// Builtin registry plus a `static` probe type always returning `result`.
pub fn static_registry(result: RunResult) -> ProbeRegistry {
    let mut registry = ProbeRegistry::with_builtins();
    registry.register("static", move |_conf: &QueryConfig| -> Result<Arc<dyn Probe>> {
        Ok(Arc::new(StaticProbe::new(result.clone())))
    });
    registry
}
