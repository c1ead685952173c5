// src/check/report.rs

//! Structured report emitted after every test run, and its text rendering.

use chrono::{DateTime, Local};

use crate::dag::RunResult;
use crate::types::State;

/// Maximum length of the one-line summary.
pub const SUMMARY_LEN: usize = 40;

/// Static, operator facing information attached to every report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportMetadata {
    pub documentation: String,
    pub investigation: String,
    pub priority: String,
    pub url: String,
}

/// Outcome of one run of a test.
#[derive(Debug, Clone)]
pub struct Report {
    pub test: String,
    /// Service description used by the monitoring authority.
    pub service: String,
    pub state: State,
    pub summary: String,
    pub output: String,
    pub error: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub time: DateTime<Local>,
    pub metadata: ReportMetadata,
    /// Final value when the run succeeded.
    pub value: Option<String>,
    /// Results of the named subtasks, in declaration order.
    pub subtasks: Vec<(String, RunResult)>,
    /// Values recorded by `save` filters that differ from `output`.
    pub extra: Vec<(String, String)>,
    /// Rendered text body.
    pub text: String,
}

/// `(summary, output, error, state)` for one result.
pub(crate) fn describe(result: &RunResult) -> (String, String, String, State) {
    match result {
        Ok(value) => (value.clone(), value.clone(), String::new(), State::Ok),
        Err(failure) => (
            failure.message.clone(),
            failure.result.clone().unwrap_or_default(),
            failure.detail.clone().unwrap_or_default(),
            failure.state(),
        ),
    }
}

/// First line of `s`, at most [`SUMMARY_LEN`] characters.
pub fn summarize(s: &str) -> String {
    s.lines().next().unwrap_or("").chars().take(SUMMARY_LEN).collect()
}

/// Join list-like metadata (documentation, investigation) one item per line.
pub fn join_lines(lines: &[String]) -> String {
    lines.join("\n").trim_end().to_string()
}

/// Render the report text. Non-OK reports carry error, investigation and
/// priority sections as well.
pub fn render(report: &Report) -> String {
    let mut text = format!(
        "{test} {state}: {summary}\nCheckdag report for test {test} on {target}\n\n",
        test = report.test,
        state = report.state,
        summary = report.summary,
        target = target(report),
    );

    let bad = report.state != State::Ok;
    if bad && !report.metadata.priority.is_empty() {
        text.push_str(&format!("Priority: {}\n", report.metadata.priority));
    }

    text.push_str(&format!("Full Output:\n{}\n\n", report.output));
    if bad {
        text.push_str(&format!("Error:\n{}\n\n", report.error));
    }
    text.push_str(&format!(
        "Documentation:\n{}\n\n",
        report.metadata.documentation
    ));
    if bad {
        text.push_str(&format!(
            "Investigation:\n{}\n\n",
            report.metadata.investigation
        ));
    }
    text.push_str(&format!(
        "{}\n\n{}\n",
        report.metadata.url,
        report.time.format("%a %b %e %H:%M:%S %Y")
    ));
    text
}

fn target(report: &Report) -> String {
    let host = report.host.as_deref().unwrap_or("localhost");
    match report.port {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
