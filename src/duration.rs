/// Duration literals in the `1m30s` / `300ms` notation used on the command
/// line and in the config file.
///
/// A literal is a sequence of decimal numbers, each followed by a unit
/// (`ns`, `us`/`µs`, `ms`, `s`, `m`, `h`). The bare literal `0` is also accepted.
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::sync::LazyLock;
use std::time::Duration;

/// One `<number><unit>` segment, anchored at the start of the remaining input.
static SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d*)?|\.\d+)(ns|us|µs|μs|ms|s|m|h)").unwrap()
});

/// Errors produced when parsing a duration literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurationError {
    Empty,
    Invalid(String),
    Overflow(String),
}

impl std::fmt::Display for DurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DurationError::Empty => write!(f, "empty duration"),
            DurationError::Invalid(s) => write!(
                f,
                "invalid duration {s:?} (expected e.g. \"500ms\", \"10s\", \"1m30s\")"
            ),
            DurationError::Overflow(s) => write!(f, "duration {s:?} is too large"),
        }
    }
}

impl std::error::Error for DurationError {}

fn unit_nanos(unit: &str) -> f64 {
    match unit {
        "ns" => 1.0,
        "us" | "µs" | "μs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        _ => 3600e9,
    }
}

/// Parse a duration literal such as `10s`, `1.5s` or `1h2m3s`.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DurationError::Empty);
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = input;
    let mut total_nanos = 0f64;
    while !rest.is_empty() {
        let caps = SEGMENT
            .captures(rest)
            .ok_or_else(|| DurationError::Invalid(input.to_string()))?;
        let value: f64 = caps[1]
            .parse()
            .map_err(|_| DurationError::Invalid(input.to_string()))?;
        total_nanos += value * unit_nanos(&caps[2]);
        rest = &rest[caps[0].len()..];
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(DurationError::Overflow(input.to_string()));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Render a duration in the same notation `parse_duration` accepts.
///
/// Sub-second values use the largest fitting unit (`300ms`, `1.5µs`); longer
/// values are split into hours, minutes and seconds (`1m30s`, `2h0m0s`).
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    let nanos = d.as_nanos();
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return format!("{}µs", nanos as f64 / 1e3);
    }
    if nanos < 1_000_000_000 {
        return format!("{}ms", nanos as f64 / 1e6);
    }

    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = (total_secs % 60) as f64 + f64::from(d.subsec_nanos()) / 1e9;
    if hours > 0 {
        format!("{hours}h{minutes}m{secs}s")
    } else if minutes > 0 {
        format!("{minutes}m{secs}s")
    } else {
        format!("{secs}s")
    }
}

/// `serde` adapter for duration literals stored as strings.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}
