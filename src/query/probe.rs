// src/query/probe.rs

//! Probe capability and the registry mapping type names to constructors.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::dag::Value;
use crate::errors::{CheckdagError, Failure, Result};
use crate::query::QueryConfig;
use crate::query::noop::NoopProbe;
use crate::query::subprocess::SubprocessProbe;
use crate::query::tcp::TcpProbe;

/// Something that can produce one value from a remote system.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    async fn run(&self) -> std::result::Result<Value, Failure>;
}

/// Builds a probe from its config. Fails with a config or init error.
pub type ProbeFactory = Arc<dyn Fn(&QueryConfig) -> Result<Arc<dyn Probe>> + Send + Sync>;

/// Type name -> probe constructor.
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    factories: HashMap<String, ProbeFactory>,
}

impl fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ProbeRegistry").field("types", &names).finish()
    }
}

impl ProbeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `noop`, `subprocess` and `tcp` probes.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("noop", NoopProbe::from_config);
        registry.register("subprocess", SubprocessProbe::from_config);
        registry.register("tcp", TcpProbe::from_config);
        registry
    }

    /// Add or replace the constructor for `kind`.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&QueryConfig) -> Result<Arc<dyn Probe>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn create(&self, conf: &QueryConfig) -> Result<Arc<dyn Probe>> {
        let factory = self.factories.get(&conf.kind).ok_or_else(|| {
            CheckdagError::ConfigError(format!(
                "query '{}' has unknown type '{}'",
                conf.label, conf.kind
            ))
        })?;
        factory(conf)
    }
}
