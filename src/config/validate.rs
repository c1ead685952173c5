// src/config/validate.rs

use crate::check::{Expr, Filter, Tester};
use crate::config::assemble::{QueryBody, QueryTree, parse_query_tree};
use crate::config::interval::IntervalSpec;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{CheckdagError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::CheckdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(
            raw.scheduler,
            raw.cluster,
            raw.defaults,
            raw.test,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tests(cfg)?;
    validate_cluster(cfg)?;
    validate_defaults(cfg)?;
    validate_tests(cfg)?;
    Ok(())
}

fn ensure_has_tests(cfg: &RawConfigFile) -> Result<()> {
    if cfg.test.is_empty() {
        return Err(CheckdagError::ConfigError(
            "config must contain at least one [test.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_cluster(cfg: &RawConfigFile) -> Result<()> {
    let Some(cluster) = &cfg.cluster else {
        return Ok(());
    };

    if let Some(refresh) = &cluster.refresh {
        let every = interval("[cluster].refresh", refresh)?;
        if every.is_zero() {
            return Err(CheckdagError::ConfigError(
                "[cluster].refresh must be greater than zero".to_string(),
            ));
        }
    }

    match (cluster.peer_id, cluster.peer_count) {
        (Some(id), Some(count)) if count > 0 && id >= count => {
            Err(CheckdagError::ConfigError(format!(
                "[cluster].peer_id must be lower than peer_count (got {id} >= {count})"
            )))
        }
        (Some(_), None) | (None, Some(_)) if cluster.membership_file.is_none() => {
            Err(CheckdagError::ConfigError(
                "[cluster] needs both peer_id and peer_count, or a membership_file".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

fn validate_defaults(cfg: &RawConfigFile) -> Result<()> {
    if let Some(repeat) = &cfg.defaults.repeat {
        interval("[defaults].repeat", repeat)?;
    }
    if let Some(timeout) = &cfg.defaults.timeout {
        ensure_positive_timeout("[defaults].timeout", interval("[defaults].timeout", timeout)?)?;
    }
    Ok(())
}

fn validate_tests(cfg: &RawConfigFile) -> Result<()> {
    for (name, test) in cfg.test.iter() {
        if let Some(repeat) = &test.repeat {
            interval(&format!("test '{name}' repeat"), repeat)?;
        }
        if let Some(timeout) = &test.timeout {
            let what = format!("test '{name}' timeout");
            ensure_positive_timeout(&what, interval(&what, timeout)?)?;
        }

        validate_checks(
            name,
            &test.filters,
            test.warning.as_deref(),
            test.critical.as_deref(),
        )?;

        let tree = parse_query_tree(&format!("test.{name}.query"), &test.query)?;
        validate_tree(name, &tree)?;
    }
    Ok(())
}

fn validate_tree(path: &str, tree: &QueryTree) -> Result<()> {
    if let Some(timeout) = tree.overrides.timeout {
        ensure_positive_timeout(&format!("'{path}' timeout"), timeout)?;
    }
    validate_checks(
        path,
        &tree.overrides.filters,
        tree.overrides.warning.as_deref(),
        tree.overrides.critical.as_deref(),
    )?;

    if let QueryBody::Compound {
        return_expr,
        children,
    } = &tree.body
    {
        Expr::parse(return_expr).map_err(|e| {
            CheckdagError::ConfigError(format!("Syntax error in return of '{path}': {e}"))
        })?;
        for (name, child) in children {
            validate_tree(&format!("{path}.{name}"), child)?;
        }
    }
    Ok(())
}

fn validate_checks(
    path: &str,
    filters: &[String],
    warning: Option<&str>,
    critical: Option<&str>,
) -> Result<()> {
    for spec in filters {
        Filter::parse(spec).map_err(|e| match e {
            CheckdagError::ConfigError(msg) => {
                CheckdagError::ConfigError(format!("test '{path}': {msg}"))
            }
            other => other,
        })?;
    }
    for (level, test) in [("warning", warning), ("critical", critical)] {
        if let Some(test) = test {
            Tester::parse(test).map_err(|e| {
                CheckdagError::ConfigError(format!("test '{path}': invalid {level} test: {e}"))
            })?;
        }
    }
    Ok(())
}

fn interval(what: &str, spec: &IntervalSpec) -> Result<std::time::Duration> {
    spec.to_duration()
        .map_err(|e| CheckdagError::ConfigError(format!("{what}: {e}")))
}

fn ensure_positive_timeout(what: &str, timeout: std::time::Duration) -> Result<()> {
    if timeout.is_zero() {
        return Err(CheckdagError::ConfigError(format!(
            "{what} must be greater than zero"
        )));
    }
    Ok(())
}
