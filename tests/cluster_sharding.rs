// tests/cluster_sharding.rs

use std::error::Error;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use checkdag::cluster::{FileMembership, Membership, PeerInfo, ShardPolicy, StaticMembership};
use checkdag::config::ConfigFile;
use checkdag::query::ProbeRegistry;
use checkdag_test_utils::builders::{ConfigFileBuilder, QueryBuilder, TestConfigBuilder};
use checkdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn peers(peer_id: u32, peer_count: u32) -> Option<PeerInfo> {
    Some(PeerInfo {
        peer_id,
        peer_count,
    })
}

#[test]
fn tasks_are_split_by_index() {
    let first = ShardPolicy::fixed(peers(0, 3));
    let second = ShardPolicy::fixed(peers(1, 3));

    let mine: Vec<usize> = (0..7).filter(|i| first.should_run(*i)).collect();
    let theirs: Vec<usize> = (0..7).filter(|i| second.should_run(*i)).collect();

    assert_eq!(mine, vec![0, 3, 6]);
    assert_eq!(theirs, vec![1, 4]);
}

#[test]
fn missing_or_empty_membership_runs_everything() {
    for info in [None, peers(0, 0), peers(5, 0)] {
        let policy = ShardPolicy::fixed(info);
        assert!((0..5).all(|i| policy.should_run(i)), "{info:?}");
    }
}

#[tokio::test]
async fn file_membership_is_read_on_refresh() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("peers.toml");
    fs::write(&path, "peer_id = 1\npeer_count = 2\n")?;

    let source = FileMembership::new(&path);
    assert_eq!(source.lookup().await?, peers(1, 2));

    let policy = ShardPolicy::new(Arc::new(FileMembership::new(&path)));
    assert_eq!(policy.snapshot(), None);
    policy.refresh().await;
    assert_eq!(policy.snapshot(), peers(1, 2));
    assert!(!policy.should_run(0));
    assert!(policy.should_run(1));

    fs::write(&path, "peer_id = 0\npeer_count = 2\n")?;
    policy.refresh().await;
    assert!(policy.should_run(0));
    Ok(())
}

#[tokio::test]
async fn unreadable_membership_fails_open() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("peers.toml");
    fs::write(&path, "peer_id = 1\npeer_count = 2\n")?;

    let policy = ShardPolicy::new(Arc::new(FileMembership::new(&path)));
    policy.refresh().await;
    assert!(!policy.should_run(0));

    fs::remove_file(&path)?;
    policy.refresh().await;
    assert_eq!(policy.snapshot(), None);
    assert!(policy.should_run(0));

    fs::write(&path, "not toml = = =")?;
    policy.refresh().await;
    assert!(policy.should_run(0));
    Ok(())
}

#[tokio::test]
async fn background_refresh_picks_up_changes() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("peers.toml");
    fs::write(&path, "peer_id = 1\npeer_count = 2\n")?;

    let policy = Arc::new(ShardPolicy::new(Arc::new(FileMembership::new(&path))));
    policy.refresh().await;
    let handle = Arc::clone(&policy).spawn_refresh(Duration::from_millis(20));

    fs::write(&path, "peer_id = 0\npeer_count = 1\n")?;
    with_timeout(async {
        while policy.snapshot() != peers(0, 1) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    assert!(policy.should_run(7));
    handle.abort();
    Ok(())
}

#[tokio::test]
async fn static_membership_returns_configured_peers() -> TestResult {
    let source = StaticMembership::new(peers(2, 4));
    assert_eq!(source.lookup().await?, peers(2, 4));
    Ok(())
}

fn three_tests() -> ConfigFileBuilder {
    ConfigFileBuilder::new()
        .with_test("a", TestConfigBuilder::new(QueryBuilder::noop("a")).build())
        .with_test("b", TestConfigBuilder::new(QueryBuilder::noop("b")).build())
        .with_test("c", TestConfigBuilder::new(QueryBuilder::noop("c")).build())
}

async fn run_all(cfg: &ConfigFile) -> Result<Vec<(String, String)>, Box<dyn Error>> {
    let setup = checkdag::build_setup(cfg, ProbeRegistry::with_builtins()).await?;
    let mut out = Vec::new();
    for test in &setup.tests {
        let value = test.run().await.map_err(|f| f.message)?;
        out.push((test.name().to_string(), value));
    }
    Ok(out)
}

#[tokio::test]
async fn configured_peers_skip_other_shards() -> TestResult {
    init_tracing();
    let cfg = three_tests().with_peers(1, 2).build();

    let results = run_all(&cfg).await?;

    // Only "b" (index 1) runs here; skipped tests return an empty value
    // and produce no report.
    assert_eq!(
        results,
        vec![
            ("a".to_string(), String::new()),
            ("b".to_string(), "b".to_string()),
            ("c".to_string(), String::new()),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn membership_file_drives_sharding() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("peers.toml");
    fs::write(&path, "peer_id = 0\npeer_count = 2\n")?;
    let cfg = three_tests().with_membership_file(&path).build();

    let setup = checkdag::build_setup(&cfg, ProbeRegistry::with_builtins()).await?;
    for test in &setup.tests {
        test.run().await.map_err(|f| f.message)?;
    }

    let reported: Vec<&str> = setup
        .tests
        .iter()
        .filter(|t| t.last_report().is_some())
        .map(|t| t.name())
        .collect();
    assert_eq!(reported, vec!["a", "c"]);
    Ok(())
}
