// tests/filters.rs

use std::error::Error;

use checkdag::check::{Filter, Saved};
use checkdag::dag::RunResult;
use checkdag::errors::{CheckdagError, Failure, FailureKind};
use chrono::{Local, TimeZone};

type TestResult = Result<(), Box<dyn Error>>;

fn ok(value: &str) -> RunResult {
    Ok(value.to_string())
}

fn run(spec: &str, input: RunResult) -> Result<RunResult, Box<dyn Error>> {
    let filter = Filter::parse(spec)?;
    let mut saved = Saved::new();
    Ok(filter.apply(input, &mut saved))
}

fn failure_kind(result: &RunResult) -> Option<FailureKind> {
    result.as_ref().err().map(|f| f.kind)
}

#[test]
fn regex_returns_first_group_or_whole_match() -> TestResult {
    let uptime = " 10:01:02 up 3 days, load average: 0.42, 0.30, 0.20\n";

    assert_eq!(run("regex:load average: ([0-9.]+)", ok(uptime))?, ok("0.42"));
    assert_eq!(run("regex:up \\d+ days", ok(uptime))?, ok("up 3 days"));
    Ok(())
}

#[test]
fn regex_spans_lines() -> TestResult {
    let body = "header\nstatus: ok\nfooter\n";
    assert_eq!(run("regex:^status: (\\w+)$", ok(body))?, ok("ok"));
    assert_eq!(run("regex:header.(status)", ok(body))?, ok("status"));
    Ok(())
}

#[test]
fn regex_miss_is_critical_unless_defaulted() -> TestResult {
    let missed = run("regex:errors=(\\d+)", ok("all fine"))?;
    let failure = missed.as_ref().err().ok_or("expected failure")?;
    assert_eq!(failure.kind, FailureKind::Critical);
    assert_eq!(failure.result.as_deref(), Some("all fine"));

    assert_eq!(run("regex[0]:errors=(\\d+)", ok("all fine"))?, ok("0"));
    Ok(())
}

#[test]
fn grep_keeps_or_drops_matching_lines() -> TestResult {
    let log = "INFO start\nERROR disk\nINFO done\nERROR net\n";

    assert_eq!(run("grep:^ERROR", ok(log))?, ok("ERROR disk\nERROR net\n"));
    assert_eq!(run("grepv:^ERROR", ok(log))?, ok("INFO start\nINFO done\n"));
    assert_eq!(failure_kind(&run("grep:^WARN", ok(log))?), Some(FailureKind::Critical));
    assert_eq!(run("grep[none]:^WARN", ok(log))?, ok("none"));
    Ok(())
}

#[test]
fn lines_and_bytes_count() -> TestResult {
    assert_eq!(run("lines", ok("a\nb\nc\n"))?, ok("3"));
    assert_eq!(run("lines", ok("a\nb"))?, ok("2"));
    assert_eq!(run("lines", ok(""))?, ok("0"));
    assert_eq!(run("bytes", ok("héllo"))?, ok("6"));
    Ok(())
}

#[test]
fn date2epoch_reads_local_time() -> TestResult {
    let expected = Local
        .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
        .earliest()
        .ok_or("ambiguous local time")?
        .timestamp();

    assert_eq!(
        run("date2epoch:%Y-%m-%d %H:%M:%S", ok("2024-01-02 03:04:05\n"))?,
        Ok(format!("{expected}.0"))
    );
    assert_eq!(failure_kind(&run("date2epoch:%Y-%m-%d", ok("yesterday"))?), Some(FailureKind::Critical));
    assert_eq!(run("date2epoch[-1]:%Y-%m-%d", ok("yesterday"))?, ok("-1"));
    Ok(())
}

#[test]
fn save_records_value_and_passes_it_on() -> TestResult {
    let filter = Filter::parse("save:raw")?;
    let mut saved = Saved::new();

    let out = filter.apply(ok("17"), &mut saved);

    assert_eq!(out, ok("17"));
    assert_eq!(saved.get("raw").map(String::as_str), Some("17"));
    Ok(())
}

#[test]
fn ordinary_filters_pass_failures_through() -> TestResult {
    let failure = Failure::unknown("probe broke");
    for spec in ["regex:x", "lines", "bytes", "save:x", "grep:x", "warning:> 1"] {
        assert_eq!(run(spec, Err(failure.clone()))?, Err(failure.clone()), "{spec}");
    }
    Ok(())
}

#[test]
fn thresholds_raise_their_level() -> TestResult {
    let warn = run("warning:> 5", ok("7"))?;
    let failure = warn.as_ref().err().ok_or("expected warning")?;
    assert_eq!(failure.kind, FailureKind::Warning);
    assert_eq!(failure.message, "warning > 5");
    assert_eq!(failure.result.as_deref(), Some("7"));

    assert_eq!(run("warning:> 5", ok("3"))?, ok("3"));
    assert_eq!(failure_kind(&run("critical:== DOWN", ok("DOWN"))?), Some(FailureKind::Critical));
    Ok(())
}

#[test]
fn critical_escalates_an_earlier_warning() -> TestResult {
    let warned = run("warning:> 5", ok("12"))?;
    let escalated = run("critical:> 10", warned.clone())?;
    assert_eq!(failure_kind(&escalated), Some(FailureKind::Critical));

    let kept = run("critical:> 20", warned.clone())?;
    assert_eq!(kept, warned);
    Ok(())
}

#[test]
fn threshold_on_non_number_is_unknown() -> TestResult {
    let out = run("critical:> 10", ok("n/a"))?;
    assert_eq!(failure_kind(&out), Some(FailureKind::Unknown));
    Ok(())
}

#[test]
fn expect_filters_invert_results() -> TestResult {
    let refused = Failure::unknown("connection refused");

    assert_eq!(
        run("expecterror:=~refused", Err(refused.clone()))?,
        ok("Expected Error: connection refused")
    );
    assert_eq!(
        failure_kind(&run("expecterror:=~timeout", Err(refused.clone()))?),
        Some(FailureKind::Critical)
    );
    assert_eq!(
        failure_kind(&run("expecterror:=~refused", ok("all good"))?),
        Some(FailureKind::Critical)
    );

    let warning = Failure::warning("slow");
    assert_eq!(
        run("expectwarning:== slow", Err(warning.clone()))?,
        ok("Expected Error: slow")
    );
    assert_eq!(
        failure_kind(&run("expectcritical:== slow", Err(warning))?),
        Some(FailureKind::Critical)
    );
    assert_eq!(
        run("expectcritical:=~^bad", Err(Failure::critical("bad value")))?,
        ok("Expected Error: bad value")
    );
    Ok(())
}

#[test]
fn table_selects_cells_rows_and_columns() -> TestResult {
    let df = "Filesystem,Size,Used\n/,100,42\n/var,200,180\n";

    assert_eq!(run("table:1,2", ok(df))?, ok("42"));
    assert_eq!(run("table:/var,Used", ok(df))?, ok("180"));
    assert_eq!(run("table:2", ok(df))?, ok("/var,200,180"));
    assert_eq!(run("table:,Size", ok(df))?, ok("Size\n100\n200"));
    assert_eq!(run("table:1,1", ok("a\tb\nc\td\n"))?, ok("d"));
    Ok(())
}

#[test]
fn table_misses_are_critical_unless_defaulted() -> TestResult {
    let df = "name,value\nload,3\n";

    let missing = run("table:,Used", ok(df))?;
    let failure = missing.as_ref().err().ok_or("expected failure")?;
    assert_eq!(failure.kind, FailureKind::Critical);
    assert_eq!(failure.message, "No such column Used");

    assert_eq!(failure_kind(&run("table:5,1", ok(df))?), Some(FailureKind::Critical));
    assert_eq!(failure_kind(&run("table:disk", ok(df))?), Some(FailureKind::Critical));
    assert_eq!(failure_kind(&run("table:1", ok(""))?), Some(FailureKind::Critical));
    assert_eq!(run("table[0]:disk,1", ok(df))?, ok("0"));
    Ok(())
}

#[test]
fn ok_filter_passes_values_and_reports_a_match() -> TestResult {
    let filter = Filter::parse("ok:=~^maintenance")?;
    let mut saved = Saved::new();

    let out = filter.apply(ok("maintenance window"), &mut saved);
    assert_eq!(out, ok("maintenance window"));
    assert!(filter.forces_ok(&out));
    assert!(!filter.forces_ok(&ok("down")));
    assert!(!filter.forces_ok(&Err(Failure::critical("down"))));
    assert!(!filter.handles_errors());
    assert!(!filter.is_threshold());
    assert!(Filter::parse("warning:> 1")?.is_threshold());
    Ok(())
}

#[test]
fn invalid_specs_are_config_errors() {
    for spec in [
        "",
        "Regex:x",
        "nosuchfilter",
        "regex:(",
        "lines:3",
        "bytes[0]",
        "save",
        "save[x]:id",
        "warning:",
        "critical:?? 3",
        "date2epoch",
        "regex[unterminated:x",
        "lines!",
        "table",
        "table:,",
        "ok:",
        "ok[x]:> 1",
    ] {
        let err = Filter::parse(spec).expect_err(spec);
        assert!(matches!(err, CheckdagError::ConfigError(_)), "{spec}: {err}");
    }
}

#[test]
fn parsed_spec_parts_are_exposed() -> TestResult {
    let filter = Filter::parse("regex[n/a]:value=(\\d+)")?;
    assert_eq!(filter.name(), "regex");
    assert_eq!(filter.default_value(), Some("n/a"));
    assert_eq!(filter.arguments(), "value=(\\d+)");
    assert!(!filter.handles_errors());
    assert!(Filter::parse("critical:> 1")?.handles_errors());
    assert!(!Filter::parse("warning:> 1")?.handles_errors());
    Ok(())
}
