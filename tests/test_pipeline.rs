// tests/test_pipeline.rs

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use checkdag::check::{ReportMetadata, Test, TestSpec};
use checkdag::dag::Runnable;
use checkdag::errors::{CheckdagError, Failure, FailureKind, ProbeErrorKind};
use checkdag::types::State;
use checkdag_test_utils::fakes::{CountingWork, counting_task, runs};
use checkdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn query(label: &str, work: CountingWork) -> Arc<Runnable> {
    counting_task(label, Duration::ZERO, work).0
}

fn spec(name: &str) -> TestSpec {
    TestSpec::new(name, Duration::ZERO)
}

fn thresholds(name: &str) -> TestSpec {
    TestSpec {
        warning: Some("> 5".to_string()),
        critical: Some("> 10".to_string()),
        ..spec(name)
    }
}

#[tokio::test]
async fn thresholds_pick_the_state() -> TestResult {
    init_tracing();
    for (value, expected) in [
        ("12", State::Critical),
        ("7", State::Warning),
        ("3", State::Ok),
    ] {
        let test = Test::simple(thresholds("load"), query("q", CountingWork::ok(value)))?;

        with_timeout(test.run()).await.ok();

        let report = test.last_report().ok_or("no report")?;
        assert_eq!(report.state, expected, "value {value}");
        assert_eq!(report.output, value);
    }
    Ok(())
}

#[tokio::test]
async fn ok_filter_skips_later_thresholds() -> TestResult {
    init_tracing();
    for (value, expected) in [
        ("12", State::Ok),
        ("7", State::Ok),
        ("50", State::Critical),
        ("3", State::Ok),
    ] {
        let spec = TestSpec {
            filters: vec!["ok:< 20".to_string()],
            ..thresholds("load")
        };
        let test = Test::simple(spec, query("q", CountingWork::ok(value)))?;

        with_timeout(test.run()).await.ok();

        let report = test.last_report().ok_or("no report")?;
        assert_eq!(report.state, expected, "value {value}");
    }
    Ok(())
}

#[tokio::test]
async fn ok_filter_after_a_warning_does_not_clear_it() -> TestResult {
    init_tracing();
    let spec = TestSpec {
        filters: vec!["warning:> 5".to_string(), "ok:< 20".to_string()],
        ..spec("load")
    };
    let test = Test::simple(spec, query("q", CountingWork::ok("7")))?;

    with_timeout(test.run()).await.ok();

    let report = test.last_report().ok_or("no report")?;
    assert_eq!(report.state, State::Warning);
    Ok(())
}

#[tokio::test]
async fn threshold_failure_summary_names_the_check() -> TestResult {
    init_tracing();
    let test = Test::simple(thresholds("load"), query("q", CountingWork::ok("12")))?;

    let result = with_timeout(test.run()).await;

    let failure = result.err().ok_or("expected failure")?;
    assert_eq!(failure.kind, FailureKind::Critical);
    let report = test.last_report().ok_or("no report")?;
    assert_eq!(report.summary, "critical > 10");
    assert_eq!(report.value, None);
    Ok(())
}

#[tokio::test]
async fn compound_evaluates_return_expression() -> TestResult {
    init_tracing();
    let a = Test::simple(spec("sum.a"), query("a", CountingWork::ok("1")))?;
    let b = Test::simple(spec("sum.b"), query("b", CountingWork::ok("2")))?;
    let test = Test::compound(
        spec("sum"),
        vec![
            ("a".to_string(), Arc::clone(a.runnable())),
            ("b".to_string(), Arc::clone(b.runnable())),
        ],
        "$(a) + $(b)",
    )?;

    let result = with_timeout(test.run()).await;

    assert_eq!(result, Ok("3".to_string()));
    let report = test.last_report().ok_or("no report")?;
    assert_eq!(report.state, State::Ok);
    assert_eq!(report.output, "3\na: 1\nb: 2");
    assert!(report.extra.is_empty());
    let names: Vec<&str> = report.subtasks.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    Ok(())
}

#[tokio::test]
async fn compound_reports_worst_failed_child() -> TestResult {
    init_tracing();
    let ok = Test::simple(spec("disk.ok"), query("ok", CountingWork::ok("1")))?;
    let warn = Test::simple(
        spec("disk.warn"),
        query("warn", CountingWork::failing(Failure::warning("almost full").with_result("80"))),
    )?;
    let crit = Test::simple(
        spec("disk.crit"),
        query(
            "crit",
            CountingWork::failing(
                Failure::critical("disk full").with_result("97").with_detail("/var"),
            ),
        ),
    )?;
    let test = Test::compound(
        spec("disk"),
        vec![
            ("ok".to_string(), Arc::clone(ok.runnable())),
            ("warn".to_string(), Arc::clone(warn.runnable())),
            ("crit".to_string(), Arc::clone(crit.runnable())),
        ],
        "$(ok) + $(warn) + $(crit)",
    )?;

    let result = with_timeout(test.run()).await;

    assert_eq!(
        result.err().map(|f| f.kind),
        Some(FailureKind::ChildFailed)
    );
    let report = test.last_report().ok_or("no report")?;
    assert_eq!(report.state, State::Critical);
    assert_eq!(report.summary, "disk full");
    assert_eq!(report.output, "ok: 1\nwarn: 80\ncrit: 97");
    assert_eq!(report.error, "crit: /var");
    Ok(())
}

#[tokio::test]
async fn expect_filter_accepts_a_probe_failure() -> TestResult {
    init_tracing();
    let refused = Failure::probe(ProbeErrorKind::ConnectionRefused, "TCP connection refused");
    let test = Test::simple(
        TestSpec {
            filters: vec!["expecterror:=~refused".to_string()],
            ..spec("closed-port")
        },
        query("q", CountingWork::failing(refused)),
    )?;

    let result = with_timeout(test.run()).await;

    assert_eq!(result, Ok("Expected Error: TCP connection refused".to_string()));
    assert_eq!(test.last_report().ok_or("no report")?.state, State::Ok);
    Ok(())
}

#[tokio::test]
async fn probe_failure_is_reported_with_its_detail() -> TestResult {
    init_tracing();
    let refused = Failure::probe(ProbeErrorKind::ConnectionRefused, "TCP connection refused")
        .with_detail("os error 111");
    let test = Test::simple(spec("web"), query("q", CountingWork::failing(refused)))?;

    with_timeout(test.run()).await.ok();

    let report = test.last_report().ok_or("no report")?;
    assert_eq!(report.state, State::Critical);
    assert_eq!(report.summary, "TCP connection refused");
    assert_eq!(report.error, "os error 111");
    Ok(())
}

#[tokio::test]
async fn unknown_reference_in_return_is_unknown() -> TestResult {
    init_tracing();
    let a = Test::simple(spec("t.a"), query("a", CountingWork::ok("1")))?;
    let test = Test::compound(
        spec("t"),
        vec![("a".to_string(), Arc::clone(a.runnable()))],
        "$(a) + $(b)",
    )?;

    let result = with_timeout(test.run()).await;

    let failure = result.err().ok_or("expected failure")?;
    assert_eq!(failure.kind, FailureKind::Unknown);
    assert_eq!(failure.message, "Unknown sub-query in return!");
    let report = test.last_report().ok_or("no report")?;
    assert_eq!(report.state, State::Unknown);
    assert_eq!(report.error, "b");
    Ok(())
}

#[test]
fn compound_construction_errors() {
    let q = query("q", CountingWork::ok("1"));

    let empty = Test::compound(spec("empty"), Vec::new(), "1").expect_err("no subtests");
    assert!(matches!(empty, CheckdagError::ConfigError(_)));

    let bad = Test::compound(spec("bad"), vec![("q".to_string(), q)], "$(q) +")
        .expect_err("syntax error");
    assert!(matches!(bad, CheckdagError::ConfigError(msg) if msg.contains("Syntax error")));
}

#[test]
fn invalid_filter_fails_construction() {
    let q = query("q", CountingWork::ok("1"));
    let err = Test::simple(
        TestSpec {
            filters: vec!["nope:x".to_string()],
            ..spec("t")
        },
        q,
    )
    .expect_err("invalid filter");
    assert!(matches!(err, CheckdagError::ConfigError(_)));
}

#[tokio::test]
async fn saved_values_become_extra_output() -> TestResult {
    init_tracing();
    let test = Test::simple(
        TestSpec {
            filters: vec!["save:raw".to_string(), "regex:value=(\\d+)".to_string()],
            ..spec("t")
        },
        query("q", CountingWork::ok("value=42")),
    )?;

    let result = with_timeout(test.run()).await;

    assert_eq!(result, Ok("42".to_string()));
    let report = test.last_report().ok_or("no report")?;
    assert_eq!(report.extra, vec![("raw".to_string(), "value=42".to_string())]);
    assert_eq!(report.output, "42\nraw: value=42");
    Ok(())
}

#[tokio::test]
async fn every_callback_sees_the_report() -> TestResult {
    init_tracing();
    let (q, query_runs) = counting_task("q", Duration::ZERO, CountingWork::ok("3"));
    let test = Test::simple(spec("t"), q)?;

    let calls = Arc::new(AtomicUsize::new(0));
    let states = Arc::new(Mutex::new(Vec::new()));
    {
        let calls = Arc::clone(&calls);
        test.add_report_callback(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        let states = Arc::clone(&states);
        test.add_report_callback(move |report| {
            states.lock().unwrap().push(report.state);
        });
    }

    with_timeout(test.run()).await.ok();
    // Run-once tests keep their result; no second report.
    with_timeout(test.run()).await.ok();

    assert_eq!(runs(&query_runs), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*states.lock().unwrap(), vec![State::Ok]);
    Ok(())
}

#[tokio::test]
async fn report_text_layout() -> TestResult {
    init_tracing();
    let metadata = ReportMetadata {
        documentation: "Checks the load.".to_string(),
        investigation: "Log in and run top.".to_string(),
        priority: "high".to_string(),
        url: "http://wiki/load".to_string(),
    };
    let ok = Test::simple(
        TestSpec {
            host: Some("db1".to_string()),
            port: Some(5432),
            metadata: metadata.clone(),
            ..thresholds("load")
        },
        query("ok", CountingWork::ok("3")),
    )?;
    let bad = Test::simple(
        TestSpec {
            service: Some("Load average".to_string()),
            metadata,
            ..thresholds("load")
        },
        query("bad", CountingWork::ok("12")),
    )?;

    with_timeout(ok.run()).await.ok();
    with_timeout(bad.run()).await.ok();

    let ok = ok.last_report().ok_or("no report")?;
    assert_eq!(ok.service, "load");
    assert!(ok.text.starts_with("load OK: 3\nCheckdag report for test load on db1:5432\n\n"));
    assert!(ok.text.contains("Full Output:\n3\n\n"));
    assert!(ok.text.contains("Documentation:\nChecks the load.\n\n"));
    assert!(!ok.text.contains("Priority:"));
    assert!(!ok.text.contains("Investigation:"));

    let bad = bad.last_report().ok_or("no report")?;
    assert_eq!(bad.service, "Load average");
    assert!(bad.text.starts_with("load CRITICAL: critical > 10\n"));
    assert!(bad.text.contains("on localhost\n"));
    assert!(bad.text.contains("Priority: high\n"));
    assert!(bad.text.contains("Investigation:\nLog in and run top.\n\n"));
    assert!(bad.text.contains("http://wiki/load\n"));
    Ok(())
}

#[test]
fn summary_is_first_line_capped_at_forty_chars() {
    use checkdag::check::report::summarize;

    assert_eq!(summarize("first\nsecond"), "first");
    assert_eq!(summarize(&"x".repeat(100)).len(), 40);
    assert_eq!(summarize(""), "");
}
