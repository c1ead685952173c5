// src/query/tcp.rs

//! Plain TCP probe: connect, optionally send `data`, read until EOF.

use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::dag::Value;
use crate::errors::{CheckdagError, Failure, ProbeErrorKind, Result};
use crate::query::{Probe, QueryConfig};

/// TCP port checker.
///
/// The target address is resolved once at construction; a host that does
/// not resolve is an init error. An explicit `addr` parameter skips DNS.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: SocketAddr,
    data: Option<String>,
}

impl TcpProbe {
    pub fn new(addr: SocketAddr, data: Option<String>) -> Self {
        Self { addr, data }
    }

    pub fn from_config(conf: &QueryConfig) -> Result<Arc<dyn Probe>> {
        let port = conf.port.ok_or_else(|| {
            CheckdagError::ConfigError(format!("tcp query '{}' requires a 'port'", conf.label))
        })?;

        let host = match (conf.param_str("addr"), &conf.host) {
            (Some(addr), _) => addr,
            (None, Some(host)) => host.clone(),
            (None, None) => {
                return Err(CheckdagError::ConfigError(format!(
                    "tcp query '{}' requires a 'host'",
                    conf.label
                )));
            }
        };

        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| CheckdagError::InitError(format!("Failed to resolve '{host}': {e}")))?
            .next()
            .ok_or_else(|| {
                CheckdagError::InitError(format!("Failed to resolve '{host}': no addresses"))
            })?;

        Ok(Arc::new(Self::new(addr, conf.param_str("data"))))
    }
}

#[async_trait::async_trait]
impl Probe for TcpProbe {
    async fn run(&self) -> std::result::Result<Value, Failure> {
        debug!(addr = %self.addr, "connecting");

        let mut stream = TcpStream::connect(self.addr).await.map_err(|e| match e.kind() {
            ErrorKind::ConnectionRefused => {
                Failure::probe(ProbeErrorKind::ConnectionRefused, "TCP connection refused")
            }
            ErrorKind::TimedOut => {
                Failure::probe(ProbeErrorKind::Timeout, "TCP handshake timeout")
            }
            _ => Failure::probe(ProbeErrorKind::Protocol, "TCP connection failed").with_detail(e),
        })?;

        let lost = |e: std::io::Error| {
            Failure::probe(ProbeErrorKind::ConnectionLost, "TCP connection lost unexpectedly")
                .with_detail(e)
        };

        if let Some(data) = &self.data {
            stream.write_all(data.as_bytes()).await.map_err(lost)?;
        }
        stream.shutdown().await.map_err(lost)?;

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.map_err(lost)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
