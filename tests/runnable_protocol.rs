// tests/runnable_protocol.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use checkdag::cluster::{PeerInfo, ShardPolicy, ShardSlot};
use checkdag::dag::Runnable;
use checkdag::errors::{Failure, FailureKind, ProbeErrorKind};
use checkdag::types::TaskKind;
use checkdag_test_utils::fakes::{CountingWork, PanickingWork, counting_task, runs};
use checkdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test(start_paused = true)]
async fn second_start_within_repeat_returns_cached_result() -> TestResult {
    init_tracing();
    let (task, counter) = counting_task("t", Duration::from_secs(60), CountingWork::ok("42"));

    let first = task.start().await;
    tokio::time::advance(Duration::from_secs(30)).await;
    let second = task.start().await;

    assert_eq!(first, Ok("42".to_string()));
    assert_eq!(second, first);
    assert_eq!(runs(&counter), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn start_after_repeat_runs_again() -> TestResult {
    init_tracing();
    let (task, counter) = counting_task("t", Duration::from_secs(60), CountingWork::ok("x"));

    task.start().await.map_err(|f| f.message)?;
    tokio::time::advance(Duration::from_secs(61)).await;
    task.start().await.map_err(|f| f.message)?;

    assert_eq!(runs(&counter), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn repeat_past_the_end_of_the_clock_stays_cached() -> TestResult {
    init_tracing();
    let (task, counter) = counting_task("t", Duration::MAX, CountingWork::ok("x"));

    task.start().await.map_err(|f| f.message)?;
    tokio::time::advance(Duration::from_secs(86_400)).await;
    let second = task.start().await;

    assert_eq!(second, Ok("x".to_string()));
    assert_eq!(runs(&counter), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn zero_repeat_runs_exactly_once() -> TestResult {
    init_tracing();
    let (task, counter) = counting_task("once", Duration::ZERO, CountingWork::ok("x"));

    task.start().await.map_err(|f| f.message)?;
    tokio::time::advance(Duration::from_secs(3600)).await;
    task.start().await.map_err(|f| f.message)?;

    assert_eq!(runs(&counter), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_starts_share_one_execution() -> TestResult {
    init_tracing();
    let work = CountingWork::ok("slow").with_delay(Duration::from_secs(2));
    let (task, counter) = counting_task("slow", Duration::from_secs(60), work);

    let a = task.start();
    let b = task.start();
    assert!(task.is_running());

    let (ra, rb) = with_timeout(futures::future::join(a, b)).await;

    assert_eq!(ra, Ok("slow".to_string()));
    assert_eq!(ra, rb);
    assert_eq!(runs(&counter), 1);
    assert!(!task.is_running());
    Ok(())
}

#[tokio::test]
async fn failed_dependency_does_not_block_siblings() -> TestResult {
    init_tracing();
    let (bad, _) = counting_task(
        "bad",
        Duration::from_secs(60),
        CountingWork::failing(Failure::probe(ProbeErrorKind::ConnectionRefused, "refused")),
    );
    let (good, good_runs) = counting_task("good", Duration::from_secs(60), CountingWork::ok("1"));
    let (parent, parent_runs) =
        counting_task("parent", Duration::from_secs(60), CountingWork::ok("done"));
    parent.add_dependency(Arc::clone(&bad));
    parent.add_dependency(Arc::clone(&good));

    let result = with_timeout(parent.start()).await;

    assert_eq!(result, Ok("done".to_string()));
    assert_eq!(runs(&good_runs), 1);
    assert_eq!(runs(&parent_runs), 1);
    assert!(matches!(bad.last_result(), Some(Err(_))));
    assert_eq!(good.last_result(), Some(Ok("1".to_string())));
    Ok(())
}

#[tokio::test]
async fn shared_dependency_runs_once_per_interval() -> TestResult {
    init_tracing();
    let (shared, shared_runs) =
        counting_task("shared", Duration::from_secs(60), CountingWork::ok("v"));
    let a = Runnable::plain("a", Duration::from_secs(60));
    let b = Runnable::plain("b", Duration::from_secs(60));
    a.add_dependency(Arc::clone(&shared));
    b.add_dependency(Arc::clone(&shared));

    let (_, _) = with_timeout(futures::future::join(a.start(), b.start())).await;

    assert_eq!(runs(&shared_runs), 1);
    Ok(())
}

#[tokio::test]
async fn panic_in_work_becomes_unhandled_failure() -> TestResult {
    init_tracing();
    let task = Runnable::new(
        "panics",
        TaskKind::Runnable,
        Duration::from_secs(60),
        None,
        Some(Arc::new(PanickingWork)),
    );

    let result = with_timeout(task.start()).await;

    let failure = result.err().ok_or("expected a failure")?;
    assert_eq!(failure.kind, FailureKind::Unhandled);
    assert_eq!(failure.detail.as_deref(), Some("boom"));
    assert!(!task.is_running());
    Ok(())
}

#[tokio::test]
async fn shard_skip_is_silent_and_leaves_cache_alone() -> TestResult {
    init_tracing();
    let policy = Arc::new(ShardPolicy::fixed(Some(PeerInfo {
        peer_id: 0,
        peer_count: 2,
    })));
    let (mine, mine_runs) = counting_task("mine", Duration::from_secs(60), CountingWork::ok("a"));
    let (other, other_runs) =
        counting_task("other", Duration::from_secs(60), CountingWork::ok("b"));
    mine.set_shard(ShardSlot {
        index: 2,
        policy: Arc::clone(&policy),
    });
    other.set_shard(ShardSlot {
        index: 3,
        policy: Arc::clone(&policy),
    });

    assert_eq!(mine.start().await, Ok("a".to_string()));
    assert_eq!(other.start().await, Ok(String::new()));

    assert_eq!(runs(&mine_runs), 1);
    assert_eq!(runs(&other_runs), 0);
    assert!(other.last_result().is_none());
    assert!(other.last_run().is_none());
    Ok(())
}

#[test]
fn all_dependencies_lists_each_node_once() {
    let leaf = Runnable::plain("leaf", Duration::from_secs(1));
    let mid_a = Runnable::plain("mid-a", Duration::from_secs(1));
    let mid_b = Runnable::plain("mid-b", Duration::from_secs(1));
    let root = Runnable::plain("root", Duration::from_secs(1));
    mid_a.add_dependency(Arc::clone(&leaf));
    mid_b.add_dependency(Arc::clone(&leaf));
    root.add_dependencies([Arc::clone(&mid_a), Arc::clone(&mid_b)]);
    root.add_dependency(Arc::clone(&mid_a));

    let labels: Vec<String> = root
        .all_dependencies()
        .iter()
        .map(|d| d.label().to_string())
        .collect();

    assert_eq!(root.dependencies().len(), 2);
    assert_eq!(labels, vec!["mid-a", "leaf", "mid-b"]);
}
