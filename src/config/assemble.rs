// src/config/assemble.rs

//! Turn a validated [`ConfigFile`] into tests.
//!
//! A query table is either a probe (`type` plus probe parameters) or a
//! compound (`type = "compound"`, a `return` expression and one child table
//! per sub-test). Sub-tests inherit `host`, `port`, `repeat` and `timeout`
//! from their parent unless they set their own.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::check::{ReportMetadata, Test, TestSpec};
use crate::cluster::{ShardPolicy, ShardSlot};
use crate::config::interval::IntervalSpec;
use crate::config::model::{ConfigFile, TestConfig};
use crate::dag::Runnable;
use crate::errors::{CheckdagError, Result};
use crate::query::{DEFAULT_TIMEOUT, QueryConfig, QueryManager};

/// Repeat used when neither the test nor `[defaults]` set one.
pub const DEFAULT_REPEAT: Duration = Duration::from_secs(60);

/// Query type of a compound test.
pub const COMPOUND: &str = "compound";

/// Keys of a query table that configure the (sub-)test rather than the probe.
const TEST_KEYS: &[&str] = &[
    "type", "host", "port", "repeat", "timeout", "filters", "critical", "warning",
];

/// Test-level settings found inside a query table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub repeat: Option<Duration>,
    pub timeout: Option<Duration>,
    pub filters: Vec<String>,
    pub critical: Option<String>,
    pub warning: Option<String>,
}

/// A parsed query table.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTree {
    pub overrides: Overrides,
    pub body: QueryBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryBody {
    Probe {
        kind: String,
        params: toml::Table,
    },
    Compound {
        return_expr: String,
        children: Vec<(String, QueryTree)>,
    },
}

/// Parse the query table found at `path` (used in error messages).
pub fn parse_query_tree(path: &str, table: &toml::Table) -> Result<QueryTree> {
    let config_err = |msg: String| CheckdagError::ConfigError(format!("{path}: {msg}"));

    let kind = match table.get("type") {
        Some(toml::Value::String(kind)) if !kind.is_empty() => kind.clone(),
        Some(_) => return Err(config_err("query `type` must be a non-empty string".to_string())),
        None => return Err(config_err("query is missing `type`".to_string())),
    };
    let overrides = parse_overrides(table).map_err(config_err)?;

    let body = if kind == COMPOUND {
        let return_expr = match table.get("return") {
            Some(toml::Value::String(expr)) => expr.clone(),
            _ => {
                return Err(config_err(
                    "compound queries require a `return` expression".to_string(),
                ));
            }
        };

        let mut children = Vec::new();
        for (name, value) in table {
            if TEST_KEYS.contains(&name.as_str()) || name == "return" {
                continue;
            }
            match value {
                toml::Value::Table(child) => {
                    children.push((name.clone(), parse_query_tree(&format!("{path}.{name}"), child)?));
                }
                _ => {
                    return Err(config_err(format!(
                        "unexpected key `{name}` in compound query"
                    )));
                }
            }
        }
        if children.is_empty() {
            return Err(config_err(
                "compound queries require at least one sub-query".to_string(),
            ));
        }
        QueryBody::Compound {
            return_expr,
            children,
        }
    } else {
        let params = table
            .iter()
            .filter(|(key, _)| !TEST_KEYS.contains(&key.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        QueryBody::Probe { kind, params }
    };

    Ok(QueryTree { overrides, body })
}

fn parse_overrides(table: &toml::Table) -> std::result::Result<Overrides, String> {
    let string = |key: &str| -> std::result::Result<Option<String>, String> {
        match table.get(key) {
            None => Ok(None),
            Some(toml::Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(format!("`{key}` must be a string")),
        }
    };
    let interval = |key: &str| -> std::result::Result<Option<Duration>, String> {
        match table.get(key) {
            None => Ok(None),
            Some(value) => {
                let spec: IntervalSpec = value
                    .clone()
                    .try_into()
                    .map_err(|_| format!("`{key}` must be an interval"))?;
                spec.to_duration()
                    .map(Some)
                    .map_err(|e| format!("invalid `{key}`: {e}"))
            }
        }
    };

    let port = match table.get("port") {
        None => None,
        Some(toml::Value::Integer(p)) => Some(
            u16::try_from(*p).map_err(|_| format!("port {p} is out of range"))?,
        ),
        Some(_) => return Err("`port` must be an integer".to_string()),
    };

    let filters = match table.get("filters") {
        None => Vec::new(),
        Some(toml::Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                toml::Value::String(s) => Ok(s.clone()),
                _ => Err("`filters` must be a list of strings".to_string()),
            })
            .collect::<std::result::Result<_, _>>()?,
        Some(_) => return Err("`filters` must be a list of strings".to_string()),
    };

    Ok(Overrides {
        host: string("host")?,
        port,
        repeat: interval("repeat")?,
        timeout: interval("timeout")?,
        filters,
        critical: string("critical")?,
        warning: string("warning")?,
    })
}

/// Settings a sub-test inherits from its parent.
#[derive(Debug, Clone)]
struct Inherited {
    host: Option<String>,
    port: Option<u16>,
    repeat: Duration,
    timeout: Duration,
}

impl Inherited {
    fn apply(&self, overrides: &Overrides) -> Inherited {
        Inherited {
            host: overrides.host.clone().or_else(|| self.host.clone()),
            port: overrides.port.or(self.port),
            repeat: overrides.repeat.unwrap_or(self.repeat),
            timeout: overrides.timeout.unwrap_or(self.timeout),
        }
    }
}

/// Effective repeat of a top-level test.
pub fn test_repeat(cfg: &ConfigFile, test: &TestConfig) -> Result<Duration> {
    resolve_interval(test.repeat.as_ref().or(cfg.defaults.repeat.as_ref()), DEFAULT_REPEAT)
}

/// Effective probe timeout of a top-level test.
pub fn test_timeout(cfg: &ConfigFile, test: &TestConfig) -> Result<Duration> {
    resolve_interval(
        test.timeout.as_ref().or(cfg.defaults.timeout.as_ref()),
        DEFAULT_TIMEOUT,
    )
}

fn resolve_interval(spec: Option<&IntervalSpec>, default: Duration) -> Result<Duration> {
    match spec {
        Some(spec) => spec.to_duration().map_err(CheckdagError::ConfigError),
        None => Ok(default),
    }
}

/// Build every test in `cfg`.
///
/// Tests are created in name order; a test's position in that order is its
/// shard index when `shard` is given. Queries are obtained through `queries`
/// so identical probes are shared.
pub fn build_tests(
    cfg: &ConfigFile,
    queries: &mut QueryManager,
    shard: Option<Arc<ShardPolicy>>,
) -> Result<Vec<Test>> {
    let mut tests = Vec::with_capacity(cfg.test.len());

    for (index, (name, test_cfg)) in cfg.test.iter().enumerate() {
        let test = build_test(cfg, name, test_cfg, queries)?;
        if let Some(policy) = &shard {
            test.runnable().set_shard(ShardSlot {
                index,
                policy: Arc::clone(policy),
            });
        }
        debug!(test = %name, index, "built test");
        tests.push(test);
    }

    Ok(tests)
}

/// Build the single test `name`.
pub fn build_test(
    cfg: &ConfigFile,
    name: &str,
    test_cfg: &TestConfig,
    queries: &mut QueryManager,
) -> Result<Test> {
    let tree = parse_query_tree(&format!("test.{name}.query"), &test_cfg.query)?;

    let base = Inherited {
        host: test_cfg.host.clone(),
        port: test_cfg.port,
        repeat: test_repeat(cfg, test_cfg)?,
        timeout: test_timeout(cfg, test_cfg)?,
    };
    let inherited = base.apply(&tree.overrides);

    let mut filters = tree.overrides.filters.clone();
    filters.extend(test_cfg.filters.iter().cloned());

    let spec = TestSpec {
        name: name.to_string(),
        service: test_cfg.service.clone(),
        host: inherited.host.clone(),
        port: inherited.port,
        repeat: inherited.repeat,
        filters,
        warning: test_cfg.warning.clone().or(tree.overrides.warning.clone()),
        critical: test_cfg.critical.clone().or(tree.overrides.critical.clone()),
        metadata: ReportMetadata {
            documentation: text(&test_cfg.documentation),
            investigation: text(&test_cfg.investigation),
            priority: test_cfg.priority.clone().unwrap_or_default(),
            url: test_cfg.url.clone().unwrap_or_default(),
        },
    };

    build_body(spec, name, &tree.body, &inherited, queries)
}

fn text(lines: &Option<crate::config::model::TextLines>) -> String {
    lines.as_ref().map(|l| l.to_text()).unwrap_or_default()
}

fn build_body(
    spec: TestSpec,
    path: &str,
    body: &QueryBody,
    inherited: &Inherited,
    queries: &mut QueryManager,
) -> Result<Test> {
    match body {
        QueryBody::Probe { kind, params } => {
            let mut conf = QueryConfig::new(kind.as_str())
                .with_label(path)
                .with_repeat(inherited.repeat)
                .with_timeout(inherited.timeout);
            conf.host = inherited.host.clone();
            conf.port = inherited.port;
            conf.params = params.clone();

            let query = queries.add_query(&conf)?;
            Test::simple(spec, query)
        }
        QueryBody::Compound {
            return_expr,
            children,
        } => {
            let mut subtests: Vec<(String, Arc<Runnable>)> = Vec::with_capacity(children.len());
            for (child_name, child) in children {
                let child_path = format!("{path}.{child_name}");
                let child_inherited = inherited.apply(&child.overrides);
                let child_spec = TestSpec {
                    name: child_path.clone(),
                    host: child_inherited.host.clone(),
                    port: child_inherited.port,
                    repeat: child_inherited.repeat,
                    filters: child.overrides.filters.clone(),
                    warning: child.overrides.warning.clone(),
                    critical: child.overrides.critical.clone(),
                    ..TestSpec::default()
                };
                let subtest =
                    build_body(child_spec, &child_path, &child.body, &child_inherited, queries)?;
                subtests.push((child_name.clone(), Arc::clone(subtest.runnable())));
            }
            Test::compound(spec, subtests, return_expr)
        }
    }
}
