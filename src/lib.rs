// src/lib.rs

pub mod check;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod query;
pub mod sink;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::check::{Report, Test};
use crate::cli::CliArgs;
use crate::cluster::{FileMembership, Membership, PeerInfo, ShardPolicy, StaticMembership};
use crate::config::loader::{default_config_path, load_and_validate};
use crate::config::model::ConfigFile;
use crate::config::{build_test, build_tests};
use crate::dag::{Scheduler, spawn_latency_monitor};
use crate::engine::{CoreRuntime, GroupInfo, Runtime, RuntimeEvent};
use crate::exec::TokioGroupExecutor;
use crate::query::{ProbeRegistry, QueryManager};
use crate::sink::{CommandWriter, CsvTrendSink, TrendRecorder};

/// Membership refresh interval when `[cluster].refresh` is not set.
pub const DEFAULT_MEMBERSHIP_REFRESH: Duration = Duration::from_secs(60);

/// Everything built from a config before anything runs.
#[derive(Debug)]
pub struct Setup {
    pub scheduler: Scheduler,
    pub tests: Vec<Test>,
    pub queries: QueryManager,
    pub shard: Option<Arc<ShardPolicy>>,
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - probe registry / query manager / tests
/// - report sinks (command file, trend files)
/// - scheduler / runtime / executor
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    if let Some(name) = &args.test {
        let report = run_single_test(&cfg, name, ProbeRegistry::with_builtins()).await?;
        print!("{}", report.text);
        return Ok(());
    }

    let setup = build_setup(&cfg, ProbeRegistry::with_builtins()).await?;

    if args.dry_run {
        print_dry_run(&setup);
        return Ok(());
    }

    attach_sinks(&cfg, &setup.tests)?;

    if let (Some(policy), Some(cluster)) = (&setup.shard, &cfg.cluster) {
        if cluster.membership_file.is_some() {
            let every = match &cluster.refresh {
                Some(spec) => spec.to_duration().map_err(anyhow::Error::msg)?,
                None => DEFAULT_MEMBERSHIP_REFRESH,
            };
            Arc::clone(policy).spawn_refresh(every);
        }
    }

    run_scheduler(setup.scheduler).await
}

/// Build the tests of `cfg`, register them and return the scheduler before
/// it is started.
pub async fn build_setup(cfg: &ConfigFile, registry: ProbeRegistry) -> Result<Setup> {
    let shard = build_shard_policy(cfg).await;
    let mut queries = QueryManager::new(registry);
    let tests = build_tests(cfg, &mut queries, shard.clone())?;

    let mut scheduler = Scheduler::new();
    for test in &tests {
        scheduler.register(Arc::clone(test.runnable()))?;
    }

    info!(
        tests = tests.len(),
        queries = queries.len(),
        groups = scheduler.groups().len(),
        "built scheduler"
    );

    Ok(Setup {
        scheduler,
        tests,
        queries,
        shard,
    })
}

/// Sharding policy for `[cluster]`, refreshed once before returning.
pub async fn build_shard_policy(cfg: &ConfigFile) -> Option<Arc<ShardPolicy>> {
    let cluster = cfg.cluster.as_ref()?;

    let source: Arc<dyn Membership> = match &cluster.membership_file {
        Some(path) => Arc::new(FileMembership::new(path)),
        None => {
            let info = match (cluster.peer_id, cluster.peer_count) {
                (Some(peer_id), Some(peer_count)) => Some(PeerInfo {
                    peer_id,
                    peer_count,
                }),
                _ => None,
            };
            Arc::new(StaticMembership::new(info))
        }
    };

    let policy = Arc::new(ShardPolicy::new(source));
    policy.refresh().await;
    Some(policy)
}

/// Hook the configured sinks up to every test's reports. Reports are logged
/// when no command file is configured.
pub fn attach_sinks(cfg: &ConfigFile, tests: &[Test]) -> Result<()> {
    let writer = match &cfg.scheduler.command_file {
        Some(path) => Some(Arc::new(CommandWriter::open(path)?)),
        None => None,
    };
    let trend = cfg
        .scheduler
        .trend_dir
        .as_ref()
        .map(|dir| TrendRecorder::new(Arc::new(CsvTrendSink::new(dir))));

    for test in tests {
        let writer = writer.clone();
        let trend = trend.clone();
        test.add_report_callback(move |report: &Report| {
            match &writer {
                Some(writer) => {
                    if let Err(e) = writer.submit_report(report) {
                        error!(test = %report.test, error = %e, "failed to submit report");
                    }
                }
                None => info!(
                    test = %report.test,
                    state = %report.state,
                    summary = %report.summary,
                    "report"
                ),
            }
            if let Some(trend) = &trend {
                trend.record(report);
            }
        });
    }
    Ok(())
}

/// Start the scheduler and drive its groups until none is left or Ctrl-C.
pub async fn run_scheduler(mut scheduler: Scheduler) -> Result<()> {
    let plan = scheduler.start(&mut rand::thread_rng());
    let latency = spawn_latency_monitor(scheduler.latency());

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let mut core = CoreRuntime::new(plan.iter().map(|run| GroupInfo {
        id: run.group.id(),
        label: run.group.label().to_string(),
        repeat: run.group.repeat(),
    }));
    let delays: Vec<_> = plan.iter().map(|run| (run.group.id(), run.delay)).collect();
    let seed = core.seed(&delays);

    let executor = TokioGroupExecutor::new(rt_tx.clone());
    let runtime = Runtime::new(
        core,
        plan.into_iter().map(|run| run.group),
        rt_tx,
        rt_rx,
        executor,
    );
    let result = runtime.run(seed).await;
    latency.abort();
    result?;

    let stats = scheduler.stats();
    debug!(?stats, "final scheduler stats");
    Ok(())
}

/// Build and run one test once, without sharding or sinks.
pub async fn run_single_test(
    cfg: &ConfigFile,
    name: &str,
    registry: ProbeRegistry,
) -> Result<Report> {
    let test_cfg = cfg
        .test
        .get(name)
        .with_context(|| format!("no test named '{name}' in config"))?;

    let mut queries = QueryManager::new(registry);
    let test = build_test(cfg, name, test_cfg, &mut queries)?;
    test.runnable().set_repeat(Duration::ZERO);

    let _ = test.run().await;
    test.last_report()
        .with_context(|| format!("test '{name}' produced no report"))
}

/// Dry-run output: groups, their tasks and scheduler stats.
fn print_dry_run(setup: &Setup) {
    println!("checkdag dry-run");
    println!("  tests = {}", setup.tests.len());
    println!("  queries = {}", setup.queries.len());
    if let Some(policy) = &setup.shard {
        println!("  cluster = {:?}", policy.snapshot());
    }
    println!();

    let groups = setup.scheduler.groups();
    println!("groups ({}):", groups.len());
    for group in &groups {
        println!("  - {}", group.label());
        for task in group.dependencies() {
            let host = task.host().unwrap_or_else(|| "-".to_string());
            println!(
                "      {} (host: {host}, repeat: {})",
                task.label(),
                config::interval::format_interval(task.repeat())
            );
        }
    }
    println!();

    let stats = setup.scheduler.stats();
    println!("tasks ({}):", stats.tasks.count);
    for (kind, count) in &stats.tasks.by_kind {
        println!("  {kind}: {count}");
    }

    debug!("dry-run complete (no execution)");
}
