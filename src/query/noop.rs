// src/query/noop.rs

use std::sync::Arc;

use crate::dag::Value;
use crate::errors::{Failure, Result};
use crate::query::{Probe, QueryConfig};

/// Returns its `data` parameter unchanged. Useful for constants and tests.
#[derive(Debug, Clone)]
pub struct NoopProbe {
    data: String,
}

impl NoopProbe {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }

    pub fn from_config(conf: &QueryConfig) -> Result<Arc<dyn Probe>> {
        Ok(Arc::new(Self::new(conf.param_str("data").unwrap_or_default())))
    }
}

#[async_trait::async_trait]
impl Probe for NoopProbe {
    async fn run(&self) -> std::result::Result<Value, Failure> {
        Ok(self.data.clone())
    }
}
