// src/query/manager.rs

//! Registry of shared queries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::dag::Runnable;
use crate::errors::Result;
use crate::query::{ConfigKey, ProbeRegistry, QueryConfig, QueryWork};
use crate::types::TaskKind;

/// Hands out one query per canonical config.
///
/// Entries are created on first use and kept for the lifetime of the
/// manager. When a consumer asks for a shorter repeat than an existing query
/// has, the query is sped up to serve it; slower consumers keep getting
/// results via the normal throttle.
#[derive(Debug)]
pub struct QueryManager {
    registry: ProbeRegistry,
    queries: HashMap<ConfigKey, Arc<Runnable>>,
}

impl QueryManager {
    pub fn new(registry: ProbeRegistry) -> Self {
        Self {
            registry,
            queries: HashMap::new(),
        }
    }

    /// Return the query for `conf`, creating it on first use.
    pub fn add_query(&mut self, conf: &QueryConfig) -> Result<Arc<Runnable>> {
        let key = conf.key();

        if let Some(existing) = self.queries.get(&key) {
            let current = existing.repeat();
            if is_faster(conf.repeat, current) {
                debug!(
                    query = %existing,
                    from_ms = current.as_millis() as u64,
                    to_ms = conf.repeat.as_millis() as u64,
                    "lowering shared query repeat"
                );
                existing.set_repeat(conf.repeat);
            }
            return Ok(Arc::clone(existing));
        }

        let probe = self.registry.create(conf)?;
        let work = Arc::new(QueryWork::new(conf.kind.clone(), probe, conf.timeout));
        let query = Runnable::new(
            conf.label.clone(),
            TaskKind::Query,
            conf.repeat,
            conf.host.clone(),
            Some(work),
        );
        debug!(query = %query, %key, "created query");
        self.queries.insert(key, Arc::clone(&query));
        Ok(query)
    }

    pub fn get(&self, conf: &QueryConfig) -> Option<Arc<Runnable>> {
        self.queries.get(&conf.key()).cloned()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// Zero means "run once" and is slower than any real interval.
fn is_faster(candidate: Duration, current: Duration) -> bool {
    !candidate.is_zero() && (current.is_zero() || candidate < current)
}
