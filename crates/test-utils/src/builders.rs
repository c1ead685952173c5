#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use checkdag::config::interval::IntervalSpec;
use checkdag::config::{
    ClusterSection, ConfigFile, DefaultsSection, RawConfigFile, SchedulerSection, TestConfig,
};
use checkdag::errors::Result;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                scheduler: SchedulerSection::default(),
                cluster: None,
                defaults: DefaultsSection::default(),
                test: BTreeMap::new(),
            },
        }
    }

    pub fn with_test(mut self, name: &str, test: TestConfig) -> Self {
        self.config.test.insert(name.to_string(), test);
        self
    }

    pub fn with_default_repeat(mut self, repeat: &str) -> Self {
        self.config.defaults.repeat = Some(IntervalSpec::from(repeat));
        self
    }

    pub fn with_default_timeout(mut self, timeout: &str) -> Self {
        self.config.defaults.timeout = Some(IntervalSpec::from(timeout));
        self
    }

    pub fn with_peers(mut self, peer_id: u32, peer_count: u32) -> Self {
        self.config.cluster = Some(ClusterSection {
            peer_id: Some(peer_id),
            peer_count: Some(peer_count),
            ..ClusterSection::default()
        });
        self
    }

    pub fn with_membership_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cluster = Some(ClusterSection {
            membership_file: Some(path.into()),
            ..ClusterSection::default()
        });
        self
    }

    pub fn with_command_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.scheduler.command_file = Some(path.into());
        self
    }

    pub fn with_trend_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.scheduler.trend_dir = Some(path.into());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a query table (`[test.<name>.query]` or a compound child).
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    table: toml::Table,
}

impl QueryBuilder {
    pub fn new(kind: &str) -> Self {
        let mut table = toml::Table::new();
        table.insert("type".to_string(), kind.into());
        Self { table }
    }

    /// `noop` query returning `data`.
    pub fn noop(data: &str) -> Self {
        Self::new("noop").param("data", data)
    }

    /// `compound` query with the given return expression.
    pub fn compound(return_expr: &str) -> Self {
        Self::new("compound").param("return", return_expr)
    }

    pub fn param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.table.insert(key.to_string(), value.into());
        self
    }

    pub fn filter(mut self, spec: &str) -> Self {
        let entry = self
            .table
            .entry("filters")
            .or_insert_with(|| toml::Value::Array(Vec::new()));
        if let toml::Value::Array(items) = entry {
            items.push(spec.into());
        }
        self
    }

    /// Add a named sub-query to a compound query.
    pub fn child(mut self, name: &str, child: QueryBuilder) -> Self {
        self.table
            .insert(name.to_string(), toml::Value::Table(child.table));
        self
    }

    pub fn build(self) -> toml::Table {
        self.table
    }
}

/// Builder for `TestConfig`.
pub struct TestConfigBuilder {
    test: TestConfig,
}

impl TestConfigBuilder {
    pub fn new(query: QueryBuilder) -> Self {
        Self {
            test: TestConfig {
                host: None,
                port: None,
                service: None,
                repeat: None,
                timeout: None,
                filters: Vec::new(),
                critical: None,
                warning: None,
                documentation: None,
                investigation: None,
                priority: None,
                url: None,
                query: query.build(),
            },
        }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.test.host = Some(host.to_string());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.test.port = Some(port);
        self
    }

    pub fn service(mut self, service: &str) -> Self {
        self.test.service = Some(service.to_string());
        self
    }

    pub fn repeat(mut self, repeat: &str) -> Self {
        self.test.repeat = Some(IntervalSpec::from(repeat));
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.test.timeout = Some(IntervalSpec::from(timeout));
        self
    }

    pub fn filter(mut self, spec: &str) -> Self {
        self.test.filters.push(spec.to_string());
        self
    }

    pub fn critical(mut self, test: &str) -> Self {
        self.test.critical = Some(test.to_string());
        self
    }

    pub fn warning(mut self, test: &str) -> Self {
        self.test.warning = Some(test.to_string());
        self
    }

    pub fn build(self) -> TestConfig {
        self.test
    }
}
