// src/sink/trend.rs

//! Time-series recording of test results.
//!
//! Each report becomes one sample: a timestamp plus a numeric value (or
//! unknown) per data source. Data source names are stable: `_state`,
//! `_result` and one per named subtask.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::check::Report;
use crate::errors::Result;

pub const STATE_SOURCE: &str = "_state";
pub const RESULT_SOURCE: &str = "_result";

/// One row of time-series data.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendSample {
    pub timestamp: i64,
    pub values: BTreeMap<String, Option<f64>>,
}

/// A store that accepts samples keyed by host and test name.
pub trait TimeSeriesSink: Send + Sync {
    fn update(&self, host: &str, test: &str, sample: &TrendSample) -> Result<()>;
}

/// Converts reports into samples and hands them to a sink.
#[derive(Clone)]
pub struct TrendRecorder {
    sink: Arc<dyn TimeSeriesSink>,
}

impl TrendRecorder {
    pub fn new(sink: Arc<dyn TimeSeriesSink>) -> Self {
        Self { sink }
    }

    pub fn sample(report: &Report) -> TrendSample {
        let mut values = BTreeMap::new();
        values.insert(STATE_SOURCE.to_string(), Some(report.state.index() as f64));
        values.insert(
            RESULT_SOURCE.to_string(),
            report.value.as_deref().and_then(numeric),
        );
        for (name, result) in &report.subtasks {
            let value = result.as_ref().ok().and_then(|v| numeric(v));
            values.insert(name.clone(), value);
        }
        TrendSample {
            timestamp: report.time.timestamp(),
            values,
        }
    }

    /// Record `report`. Sink errors are logged, never propagated into the
    /// report callback chain.
    pub fn record(&self, report: &Report) {
        let sample = Self::sample(report);
        let host = report.host.as_deref().unwrap_or("localhost");
        if let Err(e) = self.sink.update(host, &report.test, &sample) {
            warn!(test = %report.test, %host, error = %e, "failed to record trend sample");
        }
    }
}

fn numeric(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Appends samples as CSV rows under `<dir>/<host>/<test>.csv`.
///
/// A header with the data source names is written when a file is created.
/// When the sources of a sample no longer match that header, the old file is
/// moved aside to `<test>.csv.<timestamp>` and a new one is started.
#[derive(Debug, Clone)]
pub struct CsvTrendSink {
    dir: PathBuf,
}

impl CsvTrendSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, host: &str, test: &str) -> PathBuf {
        self.dir
            .join(sanitize(host))
            .join(format!("{}.csv", sanitize(test)))
    }
}

impl TimeSeriesSink for CsvTrendSink {
    fn update(&self, host: &str, test: &str, sample: &TrendSample) -> Result<()> {
        let path = self.path_for(host, test);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let header: Vec<&str> = std::iter::once("timestamp")
            .chain(sample.values.keys().map(String::as_str))
            .collect();

        let mut fresh = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        if !fresh && !header_matches(&path, &header)? {
            let rotated = path.with_extension(format!("csv.{}", sample.timestamp));
            fs::rename(&path, &rotated)?;
            warn!(
                path = %path.display(),
                rotated = %rotated.display(),
                "trend data sources changed; starting a new file"
            );
            fresh = true;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);
        if fresh {
            writer.write_record(&header).map_err(anyhow::Error::from)?;
        }

        let row = std::iter::once(sample.timestamp.to_string()).chain(
            sample
                .values
                .values()
                .map(|v| v.map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(row).map_err(anyhow::Error::from)?;
        writer.flush()?;

        trace!(path = %path.display(), "appended trend sample");
        Ok(())
    }
}

fn header_matches(path: &Path, header: &[&str]) -> Result<bool> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(anyhow::Error::from)?;
    let existing = reader.headers().map_err(anyhow::Error::from)?;
    Ok(existing.iter().eq(header.iter().copied()))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == ',' || c.is_whitespace() { '_' } else { c })
        .collect()
}

