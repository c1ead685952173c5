// tests/config_loading.rs

use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use checkdag::config::assemble::{parse_query_tree, test_repeat, test_timeout, QueryBody};
use checkdag::config::{
    IntervalSpec, build_test, build_tests, load_and_validate, parse_and_validate, parse_interval,
};
use checkdag::errors::CheckdagError;
use checkdag::query::{ProbeRegistry, QueryManager};
use checkdag::types::TaskKind;
use checkdag_test_utils::builders::{ConfigFileBuilder, QueryBuilder, TestConfigBuilder};
use checkdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

const SAMPLE: &str = r#"
[scheduler]
command_file = "/var/lib/nagios/rw/nagios.cmd"

[defaults]
repeat = "5m"
timeout = 10

[test.load]
host = "db1"
warning = "> 5"
critical = "> 10"
documentation = ["Load average of db1.", "Page the DBA on CRITICAL."]
priority = "high"

[test.load.query]
type = "subprocess"
command = "cat /proc/loadavg"
filters = ["regex:^(\\S+)"]

[test.ratio]
host = "db1"
repeat = "1m"

[test.ratio.query]
type = "compound"
return = "$(used) / $(total) * 100"

[test.ratio.query.used]
type = "noop"
data = "30"

[test.ratio.query.total]
type = "noop"
data = "120"
host = "db2"
repeat = 30
"#;

fn config_err(contents: &str) -> String {
    match parse_and_validate(contents) {
        Err(CheckdagError::ConfigError(msg)) => msg,
        Err(other) => panic!("expected a config error, got {other}"),
        Ok(_) => panic!("expected a config error for:\n{contents}"),
    }
}

#[test]
fn sample_config_parses() -> TestResult {
    let cfg = parse_and_validate(SAMPLE)?;

    assert_eq!(cfg.test.len(), 2);
    assert!(cfg.scheduler.command_file.is_some());
    let load = &cfg.test["load"];
    assert_eq!(load.host.as_deref(), Some("db1"));
    assert_eq!(test_repeat(&cfg, load)?, Duration::from_secs(300));
    assert_eq!(test_timeout(&cfg, load)?, Duration::from_secs(10));
    assert_eq!(test_repeat(&cfg, &cfg.test["ratio"])?, Duration::from_secs(60));
    Ok(())
}

#[test]
fn load_from_disk() -> TestResult {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(SAMPLE.as_bytes())?;

    let cfg = load_and_validate(file.path())?;
    assert_eq!(cfg.test.len(), 2);

    let missing = load_and_validate("/definitely/not/here.toml");
    assert!(matches!(missing, Err(CheckdagError::IoError(_))));
    Ok(())
}

#[test]
fn query_tree_separates_test_keys_from_probe_params() -> TestResult {
    let cfg = parse_and_validate(SAMPLE)?;

    let load = parse_query_tree("load", &cfg.test["load"].query)?;
    assert_eq!(load.overrides.filters, vec!["regex:^(\\S+)".to_string()]);
    match &load.body {
        QueryBody::Probe { kind, params } => {
            assert_eq!(kind, "subprocess");
            assert!(params.contains_key("command"));
            assert!(!params.contains_key("filters"));
            assert!(!params.contains_key("type"));
        }
        other => panic!("expected a probe, got {other:?}"),
    }

    let ratio = parse_query_tree("ratio", &cfg.test["ratio"].query)?;
    match &ratio.body {
        QueryBody::Compound {
            return_expr,
            children,
        } => {
            assert_eq!(return_expr, "$(used) / $(total) * 100");
            let names: Vec<&str> = children.iter().map(|(n, _)| n.as_str()).collect();
            assert_eq!(names, vec!["total", "used"]);
            let total = &children[0].1;
            assert_eq!(total.overrides.host.as_deref(), Some("db2"));
            assert_eq!(total.overrides.repeat, Some(Duration::from_secs(30)));
        }
        other => panic!("expected a compound, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn compound_children_inherit_parent_settings() -> TestResult {
    init_tracing();
    let cfg = parse_and_validate(SAMPLE)?;
    let mut queries = QueryManager::new(ProbeRegistry::with_builtins());

    let test = build_test(&cfg, "ratio", &cfg.test["ratio"], &mut queries)?;

    let deps = test.runnable().dependencies();
    let labels: Vec<&str> = deps.iter().map(|d| d.label()).collect();
    assert_eq!(labels, vec!["ratio.total", "ratio.used"]);
    assert!(deps.iter().all(|d| d.kind() == TaskKind::Test));

    let total = &deps[0];
    assert_eq!(total.host().as_deref(), Some("db2"));
    assert_eq!(total.repeat(), Duration::from_secs(30));
    let used = &deps[1];
    assert_eq!(used.host().as_deref(), Some("db1"));
    assert_eq!(used.repeat(), Duration::from_secs(60));

    assert_eq!(with_timeout(test.run()).await, Ok("25.0".to_string()));
    Ok(())
}

#[tokio::test]
async fn host_set_in_query_table_reaches_the_report() -> TestResult {
    init_tracing();
    let cfg = parse_and_validate(
        r#"
[test.a]
service = "A"

[test.a.query]
type = "noop"
data = "1"
host = "web1"
port = 8080
repeat = "30s"
"#,
    )?;
    let mut queries = QueryManager::new(ProbeRegistry::with_builtins());

    let test = build_test(&cfg, "a", &cfg.test["a"], &mut queries)?;

    assert_eq!(test.runnable().host().as_deref(), Some("web1"));
    assert_eq!(test.runnable().repeat(), Duration::from_secs(30));
    with_timeout(test.run()).await.map_err(|f| f.message)?;
    let report = test.last_report().ok_or("no report")?;
    assert_eq!(report.host.as_deref(), Some("web1"));
    assert_eq!(report.port, Some(8080));
    Ok(())
}

#[test]
fn identical_queries_are_shared_between_tests() -> TestResult {
    let query = || QueryBuilder::noop("same");
    let cfg = ConfigFileBuilder::new()
        .with_test("fast", TestConfigBuilder::new(query()).repeat("1m").build())
        .with_test("slow", TestConfigBuilder::new(query()).repeat("10m").build())
        .with_test(
            "other",
            TestConfigBuilder::new(QueryBuilder::noop("different")).build(),
        )
        .build();
    let mut queries = QueryManager::new(ProbeRegistry::with_builtins());

    let tests = build_tests(&cfg, &mut queries, None)?;

    assert_eq!(queries.len(), 2);
    let fast = tests[0].runnable().dependencies();
    let slow = tests[2].runnable().dependencies();
    assert_eq!(tests[0].name(), "fast");
    assert_eq!(tests[2].name(), "slow");
    assert!(Arc::ptr_eq(&fast[0], &slow[0]));
    assert_eq!(fast[0].repeat(), Duration::from_secs(60));
    Ok(())
}

#[test]
fn tests_get_shard_slots_in_name_order() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_test("b", TestConfigBuilder::new(QueryBuilder::noop("b")).build())
        .with_test("a", TestConfigBuilder::new(QueryBuilder::noop("a")).build())
        .build();
    let mut queries = QueryManager::new(ProbeRegistry::with_builtins());
    let policy = Arc::new(checkdag::cluster::ShardPolicy::fixed(None));

    let tests = build_tests(&cfg, &mut queries, Some(policy))?;

    let slots: Vec<(&str, usize)> = tests
        .iter()
        .map(|t| (t.name(), t.runnable().shard().map(|s| s.index).unwrap_or(usize::MAX)))
        .collect();
    assert_eq!(slots, vec![("a", 0), ("b", 1)]);
    Ok(())
}

#[test]
fn unknown_probe_type_fails_assembly() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_test("t", TestConfigBuilder::new(QueryBuilder::new("snmp")).build())
        .build();
    let mut queries = QueryManager::new(ProbeRegistry::with_builtins());

    let err = build_tests(&cfg, &mut queries, None).expect_err("unknown type");
    assert!(matches!(err, CheckdagError::ConfigError(msg) if msg.contains("snmp")));
    Ok(())
}

#[test]
fn empty_config_is_rejected() {
    assert!(config_err("").contains("at least one"));
}

#[test]
fn bad_intervals_are_rejected() {
    let base = "[test.t.query]\ntype = \"noop\"\n";
    assert!(config_err(&format!("[test.t]\nrepeat = \"5 fortnights\"\n{base}")).contains("repeat"));
    assert!(config_err(&format!("[test.t]\ntimeout = \"0s\"\n{base}")).contains("timeout"));
    assert!(config_err(&format!("[defaults]\nrepeat = \"-1\"\n{base}")).contains("[defaults].repeat"));
    assert!(config_err("[test.t.query]\ntype = \"noop\"\ntimeout = 0\n").contains("timeout"));
}

#[test]
fn bad_checks_are_rejected() {
    let query = "[test.t.query]\ntype = \"noop\"\n";
    assert!(config_err(&format!("[test.t]\nfilters = [\"regex:(\"]\n{query}")).contains("test 't'"));
    assert!(config_err(&format!("[test.t]\ncritical = \"~~ 3\"\n{query}")).contains("critical"));
    assert!(config_err(&format!("[test.t]\nwarning = \"5\"\n{query}")).contains("warning"));
}

#[test]
fn bad_query_tables_are_rejected() {
    let cases = [
        ("[test.t.query]\ndata = 1\n", "missing `type`"),
        ("[test.t.query]\ntype = 3\n", "non-empty string"),
        ("[test.t.query]\ntype = \"compound\"\n[test.t.query.a]\ntype = \"noop\"\n", "`return`"),
        ("[test.t.query]\ntype = \"compound\"\nreturn = \"1\"\n", "at least one sub-query"),
        ("[test.t.query]\ntype = \"compound\"\nreturn = \"1\"\nextra = 5\n", "unexpected key"),
        (
            "[test.t.query]\ntype = \"compound\"\nreturn = \"$(a) +\"\n[test.t.query.a]\ntype = \"noop\"\n",
            "Syntax error",
        ),
        ("[test.t.query]\ntype = \"noop\"\nport = 70000\n", "out of range"),
    ];
    for (contents, needle) in cases {
        let msg = config_err(contents);
        assert!(msg.contains(needle), "{needle:?} not in {msg:?}");
    }
}

#[test]
fn cluster_section_is_checked() {
    let query = "[test.t.query]\ntype = \"noop\"\n";
    assert!(config_err(&format!("[cluster]\npeer_id = 2\npeer_count = 2\n{query}")).contains("peer_id"));
    assert!(config_err(&format!("[cluster]\npeer_id = 0\n{query}")).contains("peer_count"));
    assert!(config_err(&format!("[cluster]\nmembership_file = \"/tmp/p\"\nrefresh = 0\n{query}")).contains("refresh"));

    assert!(parse_and_validate(&format!("[cluster]\npeer_id = 0\npeer_count = 0\n{query}")).is_ok());
    assert!(parse_and_validate(&format!("[cluster]\nmembership_file = \"/tmp/p\"\npeer_id = 1\n{query}")).is_ok());
}

#[test]
fn interval_forms() -> TestResult {
    assert_eq!(parse_interval("30s")?, Duration::from_secs(30));
    assert_eq!(parse_interval("1.5 min")?, Duration::from_secs(90));
    assert_eq!(parse_interval("2 hours")?, Duration::from_secs(7200));
    assert_eq!(parse_interval("1d")?, Duration::from_secs(86400));
    assert_eq!(parse_interval("90")?, Duration::from_secs(90));
    assert_eq!(parse_interval("")?, Duration::ZERO);
    assert!(parse_interval("soon").is_err());
    assert!(parse_interval("3 weeks").is_err());
    Ok(())
}

#[test]
fn oversized_intervals_are_config_errors() {
    assert!(parse_interval("99999999999999999999999d").is_err());
    assert!(IntervalSpec::Seconds(1e30).to_duration().is_err());

    let query = "[test.t.query]\ntype = \"noop\"\n";
    assert!(config_err(&format!("[test.t]\nrepeat = 1e30\n{query}")).contains("too large"));
    assert!(config_err(&format!("[defaults]\ntimeout = \"99999999999999999999999d\"\n{query}")).contains("timeout"));
}

#[test]
fn malformed_toml_is_a_toml_error() {
    assert!(matches!(
        parse_and_validate("[test.t\n"),
        Err(CheckdagError::TomlError(_))
    ));
}
