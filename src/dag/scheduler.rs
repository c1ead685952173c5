// src/dag/scheduler.rs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use crate::dag::graph::TaskGraph;
use crate::dag::latency::{LatencyHistory, LatencySummary};
use crate::dag::runnable::{Runnable, TaskId, lock};
use crate::errors::{CheckdagError, Result};
use crate::types::TaskKind;

/// Window over which first runs against one host are spread.
pub const FANOUT_WINDOW: Duration = Duration::from_secs(60);

/// Task counts by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub count: usize,
    pub by_kind: BTreeMap<TaskKind, usize>,
}

impl TaskStats {
    pub fn of_kind(&self, kind: TaskKind) -> usize {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub tasks: TaskStats,
    pub latency: LatencySummary,
}

/// A group and the delay before its first run.
#[derive(Debug, Clone)]
pub struct InitialRun {
    pub group: Arc<Runnable>,
    pub delay: Duration,
}

/// Owns the top-level scheduling groups.
///
/// It is responsible for:
/// - merging registered tasks that share dependencies into groups, so shared
///   queries run once per interval for all of their consumers
/// - deriving each group's host and repeat interval
/// - spreading the first run of groups that target the same host
///
/// The recurring start / reschedule loop itself lives in the engine.
#[derive(Debug)]
pub struct Scheduler {
    /// Registered groups keyed by id. Ids are allocated monotonically so this
    /// iterates in creation order.
    groups: BTreeMap<TaskId, Arc<Runnable>>,
    /// Task id -> id of the group it belongs to. Only used while registering.
    group_index: HashMap<TaskId, TaskId>,
    registered: HashSet<TaskId>,
    latency: Arc<Mutex<LatencyHistory>>,
    started: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            groups: BTreeMap::new(),
            group_index: HashMap::new(),
            registered: HashSet::new(),
            latency: Arc::new(Mutex::new(LatencyHistory::new())),
            started: false,
        }
    }

    /// Register a top-level task.
    ///
    /// The task joins a group reachable through its dependencies if that
    /// group already runs at least as often as the task wants to. If several
    /// groups qualify they are merged into the fastest one. Otherwise the task
    /// gets a new group of its own.
    pub fn register(&mut self, task: Arc<Runnable>) -> Result<()> {
        if self.started {
            return Err(CheckdagError::ConfigError(format!(
                "cannot register {task} after the scheduler has started"
            )));
        }
        if !self.registered.insert(task.id()) {
            return Err(CheckdagError::ConfigError(format!(
                "{task} is already registered"
            )));
        }
        if let Err(err) = TaskGraph::from_root(&task).ensure_acyclic() {
            self.registered.remove(&task.id());
            return Err(err);
        }

        let deps = task.all_dependencies();
        let wanted = task.repeat();

        let mut candidates: Vec<TaskId> = Vec::new();
        for dep in &deps {
            let Some(&gid) = self.group_index.get(&dep.id()) else {
                continue;
            };
            if candidates.contains(&gid) {
                continue;
            }
            if let Some(group) = self.groups.get(&gid) {
                if runs_at_least_as_often(group.repeat(), wanted) {
                    candidates.push(gid);
                }
            }
        }

        let group = match self.pick_survivor(&candidates) {
            Some(survivor) => {
                for gid in candidates.iter().filter(|&&gid| gid != survivor.id()) {
                    self.fold_into(&survivor, *gid);
                }
                survivor
            }
            None => {
                let group = Runnable::new(
                    format!("group-{}", self.groups.len() + 1),
                    TaskKind::Group,
                    wanted,
                    None,
                    None,
                );
                debug!(group = %group, task = %task, "created group");
                self.groups.insert(group.id(), Arc::clone(&group));
                group
            }
        };

        group.add_dependency(Arc::clone(&task));
        self.group_index.insert(task.id(), group.id());
        for dep in &deps {
            self.group_index.insert(dep.id(), group.id());
        }

        debug!(
            task = %task,
            group = %group,
            groups = self.groups.len(),
            "registered task"
        );
        Ok(())
    }

    /// The candidate with the smallest effective repeat wins; ties go to the
    /// oldest group.
    fn pick_survivor(&self, candidates: &[TaskId]) -> Option<Arc<Runnable>> {
        candidates
            .iter()
            .filter_map(|gid| self.groups.get(gid))
            .min_by_key(|g| (effective_repeat(g.repeat()), g.id()))
            .cloned()
    }

    fn fold_into(&mut self, survivor: &Arc<Runnable>, victim: TaskId) {
        let Some(old) = self.groups.remove(&victim) else {
            return;
        };
        debug!(from = %old, into = %survivor, "merging groups");
        survivor.add_dependencies(old.dependencies());
        for gid in self.group_index.values_mut() {
            if *gid == victim {
                *gid = survivor.id();
            }
        }
    }

    /// Group currently holding `task`. Only meaningful before [`start`].
    ///
    /// [`start`]: Scheduler::start
    pub fn group_of(&self, task: &Runnable) -> Option<Arc<Runnable>> {
        self.group_index
            .get(&task.id())
            .and_then(|gid| self.groups.get(gid))
            .cloned()
    }

    /// Registered groups in creation order.
    pub fn groups(&self) -> Vec<Arc<Runnable>> {
        self.groups.values().cloned().collect()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn latency(&self) -> Arc<Mutex<LatencyHistory>> {
        Arc::clone(&self.latency)
    }

    /// Counts of every distinct task reachable from the registered groups,
    /// the groups themselves included.
    pub fn stats(&self) -> SchedulerStats {
        let mut seen = HashSet::new();
        let mut tasks = TaskStats::default();
        for kind in TaskKind::ALL {
            tasks.by_kind.insert(kind, 0);
        }

        for group in self.groups.values() {
            let mut nodes = vec![Arc::clone(group)];
            nodes.extend(group.all_dependencies());
            for node in nodes {
                if seen.insert(node.id()) {
                    tasks.count += 1;
                    *tasks.by_kind.entry(node.kind()).or_insert(0) += 1;
                }
            }
        }

        SchedulerStats {
            tasks,
            latency: lock(&self.latency).summary(),
        }
    }

    /// Freeze the groups and compute the delay before each group's first run.
    ///
    /// Groups are bucketed by host. Within a bucket of `n` groups the first
    /// one starts at a random offset inside the first `60s / n` slot and each
    /// following group one slot later. A lone group starts immediately.
    pub fn start<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<InitialRun> {
        self.started = true;
        self.group_index.clear();

        for group in self.groups.values() {
            finalize_group(group);
        }

        if self.groups.len() == 1 {
            return self
                .groups
                .values()
                .map(|group| InitialRun {
                    group: Arc::clone(group),
                    delay: Duration::ZERO,
                })
                .collect();
        }

        let mut by_host: BTreeMap<Option<String>, Vec<Arc<Runnable>>> = BTreeMap::new();
        for group in self.groups.values() {
            by_host
                .entry(group.host())
                .or_default()
                .push(Arc::clone(group));
        }

        let mut plan = Vec::with_capacity(self.groups.len());
        for (host, bucket) in by_host {
            let window_ms = FANOUT_WINDOW.as_millis() as u64;
            let slot_ms = (window_ms / bucket.len() as u64).max(1);
            let mut delay_ms = rng.gen_range(0..slot_ms);

            debug!(host = ?host, groups = bucket.len(), slot_ms, "scheduling host");
            for group in bucket {
                debug!(group = %group, delay_ms, "scheduled first run");
                plan.push(InitialRun {
                    group,
                    delay: Duration::from_millis(delay_ms),
                });
                delay_ms += slot_ms;
            }
        }

        info!(groups = plan.len(), "scheduler started");
        plan
    }
}

/// Pick a group's host (most common among its members) and repeat (first
/// non-zero member repeat).
fn finalize_group(group: &Runnable) {
    let deps = group.dependencies();

    let mut counts: Vec<(Option<String>, usize)> = Vec::new();
    for dep in &deps {
        let host = dep.host();
        match counts.iter_mut().find(|(h, _)| *h == host) {
            Some((_, n)) => *n += 1,
            None => counts.push((host, 1)),
        }
    }
    let mut best: Option<(Option<String>, usize)> = None;
    for (host, n) in counts {
        if best.as_ref().is_none_or(|(_, max)| n > *max) {
            best = Some((host, n));
        }
    }
    if let Some((host, _)) = best {
        group.set_host(host);
    }

    if let Some(repeat) = deps.iter().map(|d| d.repeat()).find(|r| !r.is_zero()) {
        group.set_repeat(repeat);
    }
}

/// Zero repeat means "run once", which is slower than any interval.
fn effective_repeat(repeat: Duration) -> Duration {
    if repeat.is_zero() {
        Duration::MAX
    } else {
        repeat
    }
}

fn runs_at_least_as_often(group: Duration, wanted: Duration) -> bool {
    effective_repeat(group) <= effective_repeat(wanted)
}
