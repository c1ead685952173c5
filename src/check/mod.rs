// src/check/mod.rs

//! Tests: runnables that turn query results into reports.
//!
//! One run of a test goes through these stages:
//! 1. wait for every subtask (queries or sub-tests) to settle,
//! 2. combine their results: a simple test takes its single subtask's result,
//!    a compound test evaluates its return expression; any failed sub-test
//!    of a compound short-circuits to a "child failed" marker,
//! 3. run the filter chain, which ends with an implicit `save` followed by the
//!    `warning` and `critical` thresholds,
//! 4. build a [`Report`] and hand it to every registered callback.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::dag::runnable::lock;
use crate::dag::{RunResult, Runnable, Work};
use crate::errors::{CheckdagError, Failure, FailureKind, Result};
use crate::types::{State, TaskKind};

pub mod expr;
pub mod filters;
pub mod report;
pub mod threshold;

pub use expr::{EvalError, Expr, MathError, MathValue};
pub use filters::{Filter, Saved};
pub use report::{Report, ReportMetadata};
pub use threshold::Tester;

/// Identifier of the implicit `save` filter appended to every chain.
pub const IMPLICIT_SAVE: &str = "result";

/// Name of the single subtask of a simple test.
pub const SIMPLE_SUBTASK: &str = "query";

/// Called with every report a test produces.
pub type ReportCallback = Arc<dyn Fn(&Report) + Send + Sync>;

/// Static description of a test.
#[derive(Debug, Clone, Default)]
pub struct TestSpec {
    pub name: String,
    /// Service description; defaults to the test name.
    pub service: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub repeat: Duration,
    pub filters: Vec<String>,
    pub warning: Option<String>,
    pub critical: Option<String>,
    pub metadata: ReportMetadata,
}

impl TestSpec {
    pub fn new(name: impl Into<String>, repeat: Duration) -> Self {
        Self {
            name: name.into(),
            repeat,
            ..Self::default()
        }
    }
}

enum Combine {
    Single,
    Compound(Expr),
}

/// A test and the handle used to attach report callbacks to it.
#[derive(Clone)]
pub struct Test {
    runnable: Arc<Runnable>,
    pipeline: Arc<TestPipeline>,
}

impl fmt::Debug for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Test")
            .field("name", &self.pipeline.name)
            .field("runnable", &self.runnable)
            .finish_non_exhaustive()
    }
}

impl Test {
    /// A test over a single query (or sub-test).
    pub fn simple(spec: TestSpec, query: Arc<Runnable>) -> Result<Test> {
        Self::build(
            spec,
            vec![(SIMPLE_SUBTASK.to_string(), query)],
            Combine::Single,
        )
    }

    /// A test combining named sub-tests with a return expression.
    pub fn compound(
        spec: TestSpec,
        subtests: Vec<(String, Arc<Runnable>)>,
        return_expr: &str,
    ) -> Result<Test> {
        if subtests.is_empty() {
            return Err(CheckdagError::ConfigError(format!(
                "compound test '{}' has no sub-queries",
                spec.name
            )));
        }
        let expr = Expr::parse(return_expr).map_err(|e| {
            CheckdagError::ConfigError(format!(
                "Syntax error in return of test '{}': {e}",
                spec.name
            ))
        })?;
        Self::build(spec, subtests, Combine::Compound(expr))
    }

    fn build(
        spec: TestSpec,
        subtasks: Vec<(String, Arc<Runnable>)>,
        combine: Combine,
    ) -> Result<Test> {
        let mut filters = spec
            .filters
            .iter()
            .map(|f| Filter::parse(f))
            .collect::<Result<Vec<_>>>()?;
        filters.push(Filter::save(IMPLICIT_SAVE));
        if let Some(warning) = &spec.warning {
            filters.push(Filter::parse(&format!("warning:{warning}"))?);
        }
        if let Some(critical) = &spec.critical {
            filters.push(Filter::parse(&format!("critical:{critical}"))?);
        }

        let pipeline = Arc::new(TestPipeline {
            name: spec.name.clone(),
            service: spec.service.clone().unwrap_or_else(|| spec.name.clone()),
            host: spec.host.clone(),
            port: spec.port,
            subtask_names: subtasks.iter().map(|(name, _)| name.clone()).collect(),
            combine,
            filters,
            metadata: spec.metadata.clone(),
            callbacks: Mutex::new(Vec::new()),
            last_report: Mutex::new(None),
        });

        let runnable = Runnable::new(
            spec.name.clone(),
            TaskKind::Test,
            spec.repeat,
            spec.host.clone(),
            Some(Arc::clone(&pipeline) as Arc<dyn Work>),
        );
        runnable.add_dependencies(subtasks.into_iter().map(|(_, task)| task));

        Ok(Test { runnable, pipeline })
    }

    pub fn name(&self) -> &str {
        &self.pipeline.name
    }

    pub fn runnable(&self) -> &Arc<Runnable> {
        &self.runnable
    }

    /// Register a callback invoked with every report.
    pub fn add_report_callback<F>(&self, callback: F)
    where
        F: Fn(&Report) + Send + Sync + 'static,
    {
        lock(&self.pipeline.callbacks).push(Arc::new(callback));
    }

    /// The report of the last completed run.
    pub fn last_report(&self) -> Option<Report> {
        lock(&self.pipeline.last_report).clone()
    }

    /// Start the test through the normal task protocol and wait for it.
    pub async fn run(&self) -> RunResult {
        self.runnable.start().await
    }
}

struct TestPipeline {
    name: String,
    service: String,
    host: Option<String>,
    port: Option<u16>,
    subtask_names: Vec<String>,
    combine: Combine,
    filters: Vec<Filter>,
    metadata: ReportMetadata,
    callbacks: Mutex<Vec<ReportCallback>>,
    last_report: Mutex<Option<Report>>,
}

#[async_trait::async_trait]
impl Work for TestPipeline {
    async fn run(&self, dependencies: Vec<RunResult>) -> RunResult {
        let now = Local::now();
        let subtasks: Vec<(String, RunResult)> = self
            .subtask_names
            .iter()
            .cloned()
            .zip(dependencies)
            .collect();

        let mut saved = Saved::new();
        let result = match self.combine(&subtasks, now) {
            // Subtask failures are reported as-is, never re-classified.
            Err(failure) if failure.kind == FailureKind::ChildFailed => Err(failure),
            combined => self.filter(combined, &mut saved),
        };

        let report = self.report(&result, subtasks, &saved, now);
        debug!(test = %self.name, state = %report.state, summary = %report.summary, "test finished");

        let callbacks = lock(&self.callbacks).clone();
        for callback in callbacks {
            callback(&report);
        }
        *lock(&self.last_report) = Some(report);

        result
    }
}

impl TestPipeline {
    fn filter(&self, mut result: RunResult, saved: &mut Saved) -> RunResult {
        let mut forced_ok = false;
        for filter in &self.filters {
            if forced_ok && filter.is_threshold() {
                continue;
            }
            result = filter.apply(result, saved);
            if filter.forces_ok(&result) {
                debug!(test = %self.name, filter = %filter.arguments(), "ok filter matched");
                forced_ok = true;
            }
        }
        result
    }

    fn combine(&self, subtasks: &[(String, RunResult)], now: DateTime<Local>) -> RunResult {
        match &self.combine {
            // The filters see the subtask's failure too, so `expect*` can
            // turn it back into a success.
            Combine::Single => subtasks
                .first()
                .map(|(_, r)| r.clone())
                .unwrap_or_else(|| Ok(String::new())),
            Combine::Compound(_) if subtasks.iter().any(|(_, r)| r.is_err()) => {
                Err(Failure::child_failed())
            }
            Combine::Compound(expr) => {
                let mut bindings: HashMap<String, MathValue> = subtasks
                    .iter()
                    .filter_map(|(name, r)| {
                        r.as_ref()
                            .ok()
                            .map(|v| (name.clone(), MathValue::coerce(v)))
                    })
                    .collect();
                bindings.insert(
                    "NOW".to_string(),
                    MathValue::Float(now.timestamp_millis() as f64 / 1000.0),
                );

                debug!(test = %self.name, %expr, "evaluating return");
                match expr.eval(&bindings) {
                    Ok(value) => Ok(value.to_string()),
                    Err(EvalError::UnknownRef(name)) => {
                        Err(Failure::unknown("Unknown sub-query in return!").with_detail(name))
                    }
                    Err(EvalError::Math(e)) => {
                        Err(Failure::unknown("Error evaluating return!").with_detail(e))
                    }
                }
            }
        }
    }

    fn report(
        &self,
        result: &RunResult,
        subtasks: Vec<(String, RunResult)>,
        saved: &Saved,
        now: DateTime<Local>,
    ) -> Report {
        let compound = matches!(self.combine, Combine::Compound(_));

        let (mut summary, mut output, mut error, mut state) = match result {
            Err(failure) if failure.kind == FailureKind::ChildFailed => {
                // A subtask failed: report the worst one.
                let mut out = (
                    "Something failed but I don't know what.".to_string(),
                    String::new(),
                    String::new(),
                    State::Ok,
                );
                for (_, sub) in &subtasks {
                    let (sub_summary, sub_output, sub_error, sub_state) = report::describe(sub);
                    if sub_state > out.3 {
                        out.0 = sub_summary;
                        out.3 = sub_state;
                        if !compound {
                            out.1 = sub_output;
                            out.2 = sub_error;
                        }
                    }
                }
                out
            }
            other => report::describe(other),
        };
        if matches!(result, Err(f) if f.kind == FailureKind::ChildFailed) && state == State::Ok {
            state = State::Unknown;
        }

        summary = report::summarize(&summary);
        let primary = output.clone();

        if compound {
            for (name, sub) in &subtasks {
                let (_, sub_output, sub_error, _) = report::describe(sub);
                append_line(&mut output, name, &sub_output);
                append_line(&mut error, name, &sub_error);
            }
        }

        let extra: Vec<(String, String)> = saved
            .iter()
            .filter(|(_, value)| **value != primary)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, value) in &extra {
            append_line(&mut output, name, value);
        }

        let mut report = Report {
            test: self.name.clone(),
            service: self.service.clone(),
            state,
            summary,
            output,
            error,
            host: self.host.clone(),
            port: self.port,
            time: now,
            metadata: self.metadata.clone(),
            value: result.as_ref().ok().cloned(),
            subtasks,
            extra,
            text: String::new(),
        };
        report.text = report::render(&report);

        if report.state != State::Ok {
            info!(test = %self.name, state = %report.state, summary = %report.summary, "test is not OK");
        }
        report
    }
}

fn append_line(buf: &mut String, name: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.push_str(&format!("{name}: {value}"));
}
