// src/query/mod.rs

//! Queries: deduplicated probe executions.
//!
//! A query is a [`Runnable`] whose work is one [`Probe`] call bounded by a
//! timeout. Queries are identified by a [`ConfigKey`] built from every
//! behaviour-affecting field of their [`QueryConfig`]; the [`QueryManager`]
//! hands out one shared instance per key.
//!
//! [`Runnable`]: crate::dag::Runnable

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::dag::{RunResult, Work};
use crate::errors::{Failure, ProbeErrorKind};

pub mod manager;
pub mod noop;
pub mod probe;
pub mod subprocess;
pub mod tcp;

pub use manager::QueryManager;
pub use probe::{Probe, ProbeFactory, ProbeRegistry};

/// Default per-query timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Keys that never influence what a query does and are left out of its key.
const TRANSIENT_KEYS: &[&str] = &[
    "repeat", "filters", "critical", "warning", "trend", "label", "name",
];

/// Everything needed to build one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryConfig {
    /// Probe type name, e.g. `"tcp"`.
    pub kind: String,
    /// Human readable name used in logs.
    pub label: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub repeat: Duration,
    pub timeout: Duration,
    /// Probe specific parameters.
    pub params: toml::Table,
}

impl QueryConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            label: kind.clone(),
            kind,
            host: None,
            port: None,
            repeat: Duration::from_secs(60),
            timeout: DEFAULT_TIMEOUT,
            params: toml::Table::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_repeat(mut self, repeat: Duration) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// A scalar parameter rendered as a string.
    pub fn param_str(&self, key: &str) -> Option<String> {
        self.params.get(key).and_then(scalar_to_string)
    }

    pub fn param_table(&self, key: &str) -> Option<&toml::Table> {
        self.params.get(key).and_then(|v| v.as_table())
    }

    /// Canonical identity of this query.
    pub fn key(&self) -> ConfigKey {
        let mut fields = BTreeMap::new();
        fields.insert("~type".to_string(), self.kind.clone());
        if let Some(host) = &self.host {
            fields.insert("~host".to_string(), host.clone());
        }
        if let Some(port) = self.port {
            fields.insert("~port".to_string(), port.to_string());
        }
        fields.insert(
            "~timeout".to_string(),
            self.timeout.as_millis().to_string(),
        );
        for (key, value) in &self.params {
            if TRANSIENT_KEYS.contains(&key.as_str()) {
                continue;
            }
            flatten(key, value, &mut fields);
        }

        let rendered = fields
            .iter()
            .map(|(k, v)| format!("{k}={v:?}"))
            .collect::<Vec<_>>()
            .join(";");
        ConfigKey(rendered)
    }
}

fn flatten(prefix: &str, value: &toml::Value, out: &mut BTreeMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (k, v) in table {
                flatten(&format!("{prefix}.{k}"), v, out);
            }
        }
        toml::Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten(&format!("{prefix}[{i}]"), v, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), scalar_to_string(other).unwrap_or_default());
        }
    }
}

/// Render a scalar TOML value as the string a probe sees.
pub fn scalar_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

/// Canonical, comparable form of a [`QueryConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigKey(String);

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Work of a query task: one probe call bounded by the configured timeout.
pub struct QueryWork {
    kind: String,
    probe: Arc<dyn Probe>,
    timeout: Duration,
}

impl QueryWork {
    pub fn new(kind: impl Into<String>, probe: Arc<dyn Probe>, timeout: Duration) -> Self {
        Self {
            kind: kind.into(),
            probe,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl Work for QueryWork {
    async fn run(&self, _dependencies: Vec<RunResult>) -> RunResult {
        debug!(kind = %self.kind, timeout_ms = self.timeout.as_millis() as u64, "running probe");
        match tokio::time::timeout(self.timeout, self.probe.run()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(Failure::probe(
                ProbeErrorKind::Timeout,
                format!("Timeout waiting for {} query to finish.", self.kind),
            )),
        }
    }
}
