// src/check/filters.rs

//! Result filters.
//!
//! A filter spec has the form `name[default]:arguments`, where both the
//! default and the arguments are optional:
//!
//! ```text
//! regex:load average: ([0-9.]+)
//! regex[0]:errors=(\d+)
//! lines
//! save:raw
//! table[0]:2,Used
//! ok:=~^maintenance
//! critical:> 10
//! expectcritical:=~^connection refused
//! ```
//!
//! Filters run in order over a test's result. Most of them only see
//! successful values and pass failures through untouched; the threshold and
//! `expect*` filters also look at failures so they can re-classify them.
//! An `ok` filter whose test matches keeps the value OK: the `warning` and
//! `critical` filters after it are skipped.

use std::collections::BTreeMap;
use std::fmt;

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use regex::{Regex, RegexBuilder};
use tracing::trace;

use crate::check::threshold::Tester;
use crate::dag::{RunResult, Value};
use crate::errors::{CheckdagError, Failure, FailureKind, Result};

/// Values recorded by `save` filters during one run, keyed by identifier.
pub type Saved = BTreeMap<String, Value>;

/// Threshold level a test filter raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Warning,
    Critical,
}

impl Level {
    fn kind(self) -> FailureKind {
        match self {
            Level::Warning => FailureKind::Warning,
            Level::Critical => FailureKind::Critical,
        }
    }
}

/// Which failures an `expect*` filter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Any,
    Warning,
    Critical,
}

impl Expected {
    fn accepts(self, failure: &Failure) -> bool {
        match self {
            Expected::Any => true,
            Expected::Warning => failure.kind == FailureKind::Warning,
            Expected::Critical => failure.state() == crate::types::State::Critical,
        }
    }
}

/// Row or column selector of a `table` filter: a position or a name.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Cell {
    Index(usize),
    Name(String),
}

impl Cell {
    fn parse(s: &str) -> Option<Cell> {
        if s.is_empty() {
            return None;
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = s.parse() {
                return Some(Cell::Index(index));
            }
        }
        Some(Cell::Name(s.to_string()))
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Index(i) => write!(f, "{i}"),
            Cell::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone)]
enum FilterKind {
    Regex(Regex),
    Grep { regex: Regex, invert: bool },
    Lines,
    Bytes,
    DateToEpoch,
    Table { row: Option<Cell>, col: Option<Cell> },
    Save,
    Ok(Tester),
    Threshold { level: Level, tester: Tester },
    Expect { expected: Expected, tester: Tester },
}

/// One compiled filter.
#[derive(Debug, Clone)]
pub struct Filter {
    name: String,
    default: Option<String>,
    arguments: String,
    kind: FilterKind,
}

impl Filter {
    /// Parse and compile a filter spec. Problems are config errors.
    pub fn parse(spec: &str) -> Result<Filter> {
        let (name, default, arguments) = split_spec(spec)?;
        let config_err = |msg: String| CheckdagError::ConfigError(msg);

        let kind = match name.as_str() {
            "regex" => FilterKind::Regex(
                RegexBuilder::new(&arguments)
                    .multi_line(true)
                    .dot_matches_new_line(true)
                    .build()
                    .map_err(|e| config_err(format!("Invalid regex '{arguments}': {e}")))?,
            ),
            "grep" | "grepv" => FilterKind::Grep {
                regex: Regex::new(&arguments)
                    .map_err(|e| config_err(format!("Invalid regex '{arguments}': {e}")))?,
                invert: name == "grepv",
            },
            "lines" => FilterKind::Lines,
            "bytes" => FilterKind::Bytes,
            "date2epoch" => {
                validate_date_format(&arguments).map_err(config_err)?;
                FilterKind::DateToEpoch
            }
            "table" => {
                let (row, col) = match arguments.split_once(',') {
                    Some((row, col)) => (Cell::parse(row), Cell::parse(col)),
                    None => (Cell::parse(&arguments), None),
                };
                if row.is_none() && col.is_none() {
                    return Err(config_err(format!("Empty table filter: '{arguments}'")));
                }
                FilterKind::Table { row, col }
            }
            "save" => {
                if arguments.is_empty() {
                    return Err(config_err(
                        "save filters must provide an identifier".to_string(),
                    ));
                }
                FilterKind::Save
            }
            "ok" => FilterKind::Ok(
                Tester::parse(&arguments)
                    .map_err(|e| config_err(format!("Invalid ok test: {e}")))?,
            ),
            "warning" | "critical" => FilterKind::Threshold {
                level: if name == "warning" {
                    Level::Warning
                } else {
                    Level::Critical
                },
                tester: Tester::parse(&arguments)
                    .map_err(|e| config_err(format!("Invalid {name} test: {e}")))?,
            },
            "expecterror" | "expectwarning" | "expectcritical" => FilterKind::Expect {
                expected: match name.as_str() {
                    "expectwarning" => Expected::Warning,
                    "expectcritical" => Expected::Critical,
                    _ => Expected::Any,
                },
                tester: Tester::parse(&arguments)
                    .map_err(|e| config_err(format!("Invalid {name} test: {e}")))?,
            },
            other => return Err(config_err(format!("Invalid filter type '{other}'"))),
        };

        let filter = Filter {
            name,
            default,
            arguments,
            kind,
        };

        if !filter.handles_default() && filter.default.is_some() {
            return Err(config_err(format!(
                "'{}' filters cannot take default values",
                filter.name
            )));
        }
        if !filter.handles_arguments() && !filter.arguments.is_empty() {
            return Err(config_err(format!(
                "'{}' filters cannot take arguments",
                filter.name
            )));
        }

        Ok(filter)
    }

    /// Implicit `save` filter used by tests.
    pub fn save(identifier: &str) -> Filter {
        Filter {
            name: "save".to_string(),
            default: None,
            arguments: identifier.to_string(),
            kind: FilterKind::Save,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn arguments(&self) -> &str {
        &self.arguments
    }

    pub fn handles_default(&self) -> bool {
        matches!(
            self.kind,
            FilterKind::Regex(_)
                | FilterKind::Grep { .. }
                | FilterKind::DateToEpoch
                | FilterKind::Table { .. }
        )
    }

    fn handles_arguments(&self) -> bool {
        !matches!(self.kind, FilterKind::Lines | FilterKind::Bytes)
    }

    /// Whether this filter also runs on failures.
    pub fn handles_errors(&self) -> bool {
        match self.kind {
            FilterKind::Threshold { level, .. } => level == Level::Critical,
            FilterKind::Expect { .. } => true,
            _ => false,
        }
    }

    /// Whether this is a `warning` or `critical` filter.
    pub fn is_threshold(&self) -> bool {
        matches!(self.kind, FilterKind::Threshold { .. })
    }

    /// True when this is an `ok` filter whose test matches `result`.
    pub fn forces_ok(&self, result: &RunResult) -> bool {
        match (&self.kind, result) {
            (FilterKind::Ok(tester), Ok(value)) => tester.test(value).unwrap_or(false),
            _ => false,
        }
    }

    /// Run the filter. Filters that do not handle errors pass failures through.
    pub fn apply(&self, input: RunResult, saved: &mut Saved) -> RunResult {
        if input.is_err() && !self.handles_errors() {
            return input;
        }
        trace!(filter = %self.name, arguments = %self.arguments, "applying filter");

        match &self.kind {
            FilterKind::Threshold { level, tester } => self.threshold(*level, tester, input),
            FilterKind::Expect { expected, tester } => self.expect(*expected, tester, input),
            _ => match input {
                Ok(value) => self.transform(value, saved),
                Err(failure) => Err(failure),
            },
        }
    }

    fn transform(&self, value: Value, saved: &mut Saved) -> RunResult {
        match &self.kind {
            FilterKind::Regex(regex) => match regex.captures(&value) {
                Some(caps) => {
                    let m = if caps.len() > 1 { caps.get(1) } else { caps.get(0) };
                    Ok(m.map(|m| m.as_str().to_string()).unwrap_or_default())
                }
                None => self.or_default(value),
            },
            FilterKind::Grep { regex, invert } => {
                let output: String = value
                    .split_inclusive('\n')
                    .filter(|line| {
                        let text = line.strip_suffix('\n').unwrap_or(line);
                        regex.is_match(text) != *invert
                    })
                    .collect();
                if output.is_empty() {
                    self.or_default(value)
                } else {
                    Ok(output)
                }
            }
            FilterKind::Lines => {
                if value.is_empty() {
                    return Ok("0".to_string());
                }
                let body = value.strip_suffix('\n').unwrap_or(&value);
                Ok(body.split('\n').count().to_string())
            }
            FilterKind::Bytes => Ok(value.len().to_string()),
            FilterKind::DateToEpoch => match parse_local_epoch(&value, &self.arguments) {
                Some(secs) => Ok(format!("{secs:.1}")),
                None => match &self.default {
                    Some(default) => Ok(default.clone()),
                    None => Err(Failure::critical(format!(
                        "Failed to parse date with format '{}'",
                        self.arguments
                    ))
                    .with_result(value)),
                },
            },
            FilterKind::Table { row, col } => match select_table(&value, row.as_ref(), col.as_ref()) {
                Ok(selected) => Ok(selected),
                Err(msg) => match &self.default {
                    Some(default) => Ok(default.clone()),
                    None => Err(Failure::critical(msg).with_result(value)),
                },
            },
            FilterKind::Save => {
                saved.insert(self.arguments.clone(), value.clone());
                Ok(value)
            }
            FilterKind::Ok(_) | FilterKind::Threshold { .. } | FilterKind::Expect { .. } => {
                Ok(value)
            }
        }
    }

    fn or_default(&self, value: Value) -> RunResult {
        match &self.default {
            Some(default) => Ok(default.clone()),
            None => Err(Failure::critical(format!(
                "Failed to match regex '{}'",
                self.arguments
            ))
            .with_result(value)),
        }
    }

    /// Raise `level` when the tester matches.
    ///
    /// A critical filter re-tests the value behind an earlier WARNING so it
    /// can escalate it.
    fn threshold(&self, level: Level, tester: &Tester, input: RunResult) -> RunResult {
        let value = match &input {
            Ok(value) => value.clone(),
            Err(failure) if level == Level::Critical && failure.kind == FailureKind::Warning => {
                failure.result.clone().unwrap_or_default()
            }
            Err(_) => return input,
        };

        match tester.test(&value) {
            Ok(true) => Err(Failure::new(level.kind(), format!("{} {}", self.name, tester))
                .with_result(value)),
            Ok(false) => input,
            Err(e) => Err(Failure::unknown(format!("{} test failed: {e}", self.name))
                .with_result(value)),
        }
    }

    /// Turn an expected failure into success and anything else into CRITICAL.
    fn expect(&self, expected: Expected, tester: &Tester, input: RunResult) -> RunResult {
        match input {
            Err(failure) if expected.accepts(&failure) => match tester.test(&failure.message) {
                Ok(true) => Ok(format!("Expected Error: {}", failure.message)),
                _ => Err(Failure::critical(format!("Unexpected error: {}", failure.message))
                    .with_result(failure.result.unwrap_or_default())),
            },
            Err(failure) => Err(Failure::critical(format!("Unexpected error: {}", failure.message))
                .with_result(failure.result.unwrap_or_default())),
            Ok(value) => Err(Failure::critical(format!(
                "Expected an error matching '{}'",
                tester
            ))
            .with_result(value)),
        }
    }
}

/// Candidate field separators, most preferred first.
const TABLE_DELIMITERS: [u8; 5] = [b',', b'\t', b';', b'|', b':'];

/// Pick the candidate separator that occurs most often in the first line.
fn sniff_delimiter(text: &str) -> u8 {
    let first = text.lines().next().unwrap_or_default();
    TABLE_DELIMITERS
        .into_iter()
        .rev()
        .max_by_key(|d| first.bytes().filter(|b| b == d).count())
        .unwrap_or(b',')
}

/// Select a cell, a row or a column out of delimited text.
///
/// A named column is looked up in the first row; a named row is the first
/// row whose first cell equals the name. Rows and columns are re-emitted
/// with the input's separator.
fn select_table(
    text: &str,
    row: Option<&Cell>,
    col: Option<&Cell>,
) -> std::result::Result<String, String> {
    let delimiter = sniff_delimiter(text);
    let table = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes())
        .records()
        .map(|r| r.map(|record| record.iter().map(str::to_string).collect::<Vec<_>>()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("Failed to parse table: {e}"))?;
    if table.is_empty() {
        return Err("Empty table".to_string());
    }

    let col_index = match col {
        Some(Cell::Index(i)) => Some(*i),
        Some(Cell::Name(name)) => Some(
            table[0]
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| format!("No such column {name}"))?,
        ),
        None => None,
    };
    let col_label = col.map(|c| c.to_string()).unwrap_or_default();

    let selected: Vec<Vec<String>> = match row {
        Some(spec) => {
            let line = match spec {
                Cell::Index(i) => table.get(*i).ok_or_else(|| {
                    format!("No such row {i}, last row is {}", table.len() - 1)
                })?,
                Cell::Name(name) => table
                    .iter()
                    .find(|line| line.first() == Some(name))
                    .ok_or_else(|| format!("No row starting with {name}"))?,
            };
            match col_index {
                Some(c) => {
                    return line
                        .get(c)
                        .cloned()
                        .ok_or_else(|| format!("No such column {col_label} in row {spec}"));
                }
                None => vec![line.clone()],
            }
        }
        None => {
            let c = col_index.ok_or_else(|| "Empty table filter".to_string())?;
            table
                .iter()
                .enumerate()
                .map(|(i, line)| {
                    line.get(c)
                        .map(|cell| vec![cell.clone()])
                        .ok_or_else(|| format!("No such column {col_label} in row {i}"))
                })
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for line in &selected {
        writer
            .write_record(line)
            .map_err(|e| format!("Failed to write table: {e}"))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| format!("Failed to write table: {e}"))?;
    Ok(String::from_utf8_lossy(&bytes).trim_end().to_string())
}

/// Split `name[default]:arguments`.
fn split_spec(spec: &str) -> Result<(String, Option<String>, String)> {
    let invalid = || CheckdagError::ConfigError(format!("Invalid filter spec: '{spec}'"));

    let name_len = spec
        .char_indices()
        .take_while(|(i, c)| {
            if *i == 0 {
                c.is_ascii_lowercase()
            } else {
                c.is_ascii_lowercase() || c.is_ascii_digit()
            }
        })
        .count();
    if name_len == 0 {
        return Err(invalid());
    }
    let (name, mut rest) = spec.split_at(name_len);

    let mut default = None;
    if let Some(after) = rest.strip_prefix('[') {
        let end = after.find(']').ok_or_else(invalid)?;
        default = Some(after[..end].to_string());
        rest = &after[end + 1..];
    }

    let arguments = match rest.strip_prefix(':') {
        Some(args) => args.to_string(),
        None if rest.is_empty() => String::new(),
        None => return Err(invalid()),
    };

    Ok((name.to_string(), default, arguments))
}

fn validate_date_format(format: &str) -> std::result::Result<(), String> {
    if format.is_empty() {
        return Err("date2epoch filters require a date format".to_string());
    }
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(format!("Invalid date format: {format}"));
    }
    if !items
        .iter()
        .any(|item| matches!(item, Item::Numeric(..) | Item::Fixed(..)))
    {
        return Err(format!("Invalid date format: {format}"));
    }
    Ok(())
}

/// Interpret `value` as local time in `format`, returning unix seconds.
fn parse_local_epoch(value: &str, format: &str) -> Option<f64> {
    let value = value.trim();
    let naive = NaiveDateTime::parse_from_str(value, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    let local = Local.from_local_datetime(&naive).earliest()?;
    Some(local.timestamp() as f64)
}
