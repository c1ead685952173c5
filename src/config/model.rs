// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::config::interval::IntervalSpec;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [scheduler]
/// command_file = "/var/lib/nagios/rw/nagios.cmd"
///
/// [defaults]
/// repeat = "1m"
///
/// [test.http]
/// host = "web1"
/// port = 80
/// critical = "!~ 200 OK"
///
/// [test.http.query]
/// type = "tcp"
/// data = "HEAD / HTTP/1.0\r\n\r\n"
/// ```
///
/// All sections but `[test.*]` are optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub cluster: Option<ClusterSection>,

    #[serde(default)]
    pub defaults: DefaultsSection,

    /// All tests from `[test.<name>]`, keyed by test name.
    #[serde(default)]
    pub test: BTreeMap<String, TestConfig>,
}

/// A validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub scheduler: SchedulerSection,
    pub cluster: Option<ClusterSection>,
    pub defaults: DefaultsSection,
    pub test: BTreeMap<String, TestConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        scheduler: SchedulerSection,
        cluster: Option<ClusterSection>,
        defaults: DefaultsSection,
        test: BTreeMap<String, TestConfig>,
    ) -> Self {
        Self {
            scheduler,
            cluster,
            defaults,
            test,
        }
    }
}

/// `[scheduler]` section: where reports go.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulerSection {
    /// Monitoring authority command file. Reports are only logged when unset.
    #[serde(default)]
    pub command_file: Option<PathBuf>,

    /// Directory for per-test CSV trend files.
    #[serde(default)]
    pub trend_dir: Option<PathBuf>,
}

/// `[cluster]` section: static work division across peers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterSection {
    #[serde(default)]
    pub peer_id: Option<u32>,

    #[serde(default)]
    pub peer_count: Option<u32>,

    /// TOML file with `peer_id` / `peer_count`, re-read every `refresh`.
    /// Takes precedence over the static ids.
    #[serde(default)]
    pub membership_file: Option<PathBuf>,

    #[serde(default)]
    pub refresh: Option<IntervalSpec>,
}

/// `[defaults]` section, inherited by every test.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultsSection {
    #[serde(default)]
    pub repeat: Option<IntervalSpec>,

    #[serde(default)]
    pub timeout: Option<IntervalSpec>,
}

/// Either a single string or a list of lines.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TextLines {
    One(String),
    Many(Vec<String>),
}

impl TextLines {
    pub fn to_text(&self) -> String {
        match self {
            TextLines::One(s) => s.trim_end().to_string(),
            TextLines::Many(lines) => crate::check::report::join_lines(lines),
        }
    }
}

/// `[test.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TestConfig {
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    /// Service description; defaults to the test name.
    #[serde(default)]
    pub service: Option<String>,

    /// Overrides `[defaults].repeat`. `0` runs the test once.
    #[serde(default)]
    pub repeat: Option<IntervalSpec>,

    #[serde(default)]
    pub timeout: Option<IntervalSpec>,

    #[serde(default)]
    pub filters: Vec<String>,

    #[serde(default)]
    pub critical: Option<String>,

    #[serde(default)]
    pub warning: Option<String>,

    #[serde(default)]
    pub documentation: Option<TextLines>,

    #[serde(default)]
    pub investigation: Option<TextLines>,

    #[serde(default)]
    pub priority: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    /// The `[test.<name>.query]` table. It carries `type` plus the probe
    /// parameters, or for `type = "compound"` a `return` expression and one
    /// child table per sub-test.
    pub query: toml::Table,
}
