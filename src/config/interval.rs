// src/config/interval.rs

//! Repeat / timeout interval parsing.
//!
//! Accepted forms: `"30s"`, `"1.5 min"`, `"2 hours"`, `"1d"`, a bare number of
//! seconds (`"90"`), or an empty string / `0` meaning "no interval".

use std::time::Duration;

use serde::Deserialize;

/// An interval as written in the config: either a string with a unit or a
/// plain number of seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IntervalSpec {
    Seconds(f64),
    Text(String),
}

impl IntervalSpec {
    pub fn to_duration(&self) -> Result<Duration, String> {
        match self {
            IntervalSpec::Seconds(secs) => seconds_to_duration(*secs, &secs.to_string()),
            IntervalSpec::Text(s) => parse_interval(s),
        }
    }
}

impl From<&str> for IntervalSpec {
    fn from(s: &str) -> Self {
        IntervalSpec::Text(s.to_string())
    }
}

/// Parse a human interval string into a `Duration`.
pub fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Duration::ZERO);
    }

    // Find the boundary between the number and the unit suffix.
    let idx = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let (num_part, unit_part) = s.split_at(idx);
    let value: f64 = num_part
        .parse()
        .map_err(|e| format!("invalid interval number '{}': {}", num_part, e))?;

    let unit = unit_part.trim().to_lowercase();
    let scale = match unit.as_str() {
        "" | "s" | "sec" | "second" | "seconds" => 1.0,
        "m" | "min" | "minute" | "minutes" => 60.0,
        "h" | "hour" | "hours" => 3600.0,
        "d" | "day" | "days" => 86400.0,
        _ => {
            return Err(format!(
                "invalid interval '{}'; expected a unit of seconds, minutes, hours or days",
                s
            ));
        }
    };

    seconds_to_duration(value * scale, s)
}

fn seconds_to_duration(secs: f64, original: &str) -> Result<Duration, String> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("invalid interval '{}'", original));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| format!("interval '{}' is too large", original))
}

/// Render a duration the way it is written in config files.
pub fn format_interval(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs == 0.0 {
        "0".to_string()
    } else if secs.fract() == 0.0 {
        let whole = d.as_secs();
        if whole % 3600 == 0 {
            format!("{}h", whole / 3600)
        } else if whole % 60 == 0 {
            format!("{}m", whole / 60)
        } else {
            format!("{}s", whole)
        }
    } else {
        format!("{}s", secs)
    }
}
