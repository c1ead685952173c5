// src/cluster/mod.rs

//! Static work division across a fleet of redundant checkdag instances.
//!
//! Every top-level test gets a fixed index. An instance that knows it is peer
//! `peer_id` of `peer_count` only runs the tests whose index satisfies
//! `index % peer_count == peer_id`; the others return an empty success
//! without touching their cached result.
//!
//! Peer information comes from a [`Membership`] source and is cached in a
//! [`ShardPolicy`], refreshed on a fixed interval by a background task. When
//! the source cannot be reached the policy fails open and runs everything.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dag::runnable::lock;

/// This instance's position in the peer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PeerInfo {
    pub peer_id: u32,
    pub peer_count: u32,
}

/// Source of peer information.
#[async_trait::async_trait]
pub trait Membership: Send + Sync {
    /// Look up the current peer info. `Ok(None)` means "not clustered".
    async fn lookup(&self) -> anyhow::Result<Option<PeerInfo>>;
}

/// Fixed peer info from the `[cluster]` config section.
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    info: Option<PeerInfo>,
}

impl StaticMembership {
    pub fn new(info: Option<PeerInfo>) -> Self {
        Self { info }
    }
}

#[async_trait::async_trait]
impl Membership for StaticMembership {
    async fn lookup(&self) -> anyhow::Result<Option<PeerInfo>> {
        Ok(self.info)
    }
}

/// Peer info read from a small TOML file maintained by an external agent:
///
/// ```toml
/// peer_id = 1
/// peer_count = 3
/// ```
#[derive(Debug, Clone)]
pub struct FileMembership {
    path: PathBuf,
}

impl FileMembership {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Membership for FileMembership {
    async fn lookup(&self) -> anyhow::Result<Option<PeerInfo>> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading membership file {}", self.path.display()))?;
        let info: PeerInfo = toml::from_str(&contents)
            .with_context(|| format!("parsing membership file {}", self.path.display()))?;
        Ok(Some(info))
    }
}

/// Cached sharding decision shared by every top-level task.
pub struct ShardPolicy {
    source: Arc<dyn Membership>,
    snapshot: Mutex<Option<PeerInfo>>,
}

impl std::fmt::Debug for ShardPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardPolicy")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl ShardPolicy {
    pub fn new(source: Arc<dyn Membership>) -> Self {
        Self {
            source,
            snapshot: Mutex::new(None),
        }
    }

    /// Policy with a fixed snapshot, no refresh needed.
    pub fn fixed(info: Option<PeerInfo>) -> Self {
        Self {
            source: Arc::new(StaticMembership::new(info)),
            snapshot: Mutex::new(info),
        }
    }

    pub fn snapshot(&self) -> Option<PeerInfo> {
        *lock(&self.snapshot)
    }

    /// Whether the task at `index` belongs to this peer.
    pub fn should_run(&self, index: usize) -> bool {
        match self.snapshot() {
            Some(info) if info.peer_count > 0 => {
                index % info.peer_count as usize == info.peer_id as usize
            }
            _ => true,
        }
    }

    /// Query the membership source once and update the snapshot.
    pub async fn refresh(&self) {
        let next = match self.source.lookup().await {
            Ok(info) => info,
            Err(err) => {
                warn!(error = %err, "membership lookup failed; running all tasks");
                None
            }
        };

        let mut snapshot = lock(&self.snapshot);
        if *snapshot != next {
            info!(?next, previous = ?*snapshot, "peer membership changed");
        } else {
            debug!(?next, "peer membership unchanged");
        }
        *snapshot = next;
    }

    /// Refresh the snapshot every `every` in a background task.
    pub fn spawn_refresh(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately; startup already refreshed.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.refresh().await;
            }
        })
    }
}

/// A task's fixed position in the global task order plus the policy to ask.
#[derive(Debug, Clone)]
pub struct ShardSlot {
    pub index: usize,
    pub policy: Arc<ShardPolicy>,
}

impl ShardSlot {
    pub fn should_run(&self) -> bool {
        self.policy.should_run(self.index)
    }
}
