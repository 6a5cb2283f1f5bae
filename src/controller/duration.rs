//! # Durations
//!
//! Compact duration strings as written into session status (`1h2m3s`,
//! `45s`, `1.5s`, `350ms`) and parsing of the same format reported by hosts.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<number>\d+(?:\.\d+)?)(?P<unit>ns|us|µs|ms|s|m|h)")
        .expect("duration regex is valid")
});

/// Render `d` as `<h>h<m>m<s>s`, dropping leading zero units
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    if d < Duration::from_secs(1) {
        let nanos = d.subsec_nanos();
        return if nanos < 1_000 {
            format!("{nanos}ns")
        } else if nanos < 1_000_000 {
            format!("{}µs", trim_fraction(nanos / 1_000, nanos % 1_000, 3))
        } else {
            format!(
                "{}ms",
                trim_fraction(nanos / 1_000_000, nanos % 1_000_000, 6)
            )
        };
    }

    let total = d.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    let seconds = trim_fraction(seconds, u64::from(d.subsec_nanos()), 9);
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

fn trim_fraction(whole: impl std::fmt::Display, fraction: impl Into<u64>, width: usize) -> String {
    let fraction = fraction.into();
    if fraction == 0 {
        return whole.to_string();
    }
    let digits = format!("{fraction:0width$}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

/// Parse a duration written by [`format_duration`] (or Go's `Duration.String`)
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("duration string cannot be empty".to_string());
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let mut consumed = 0;
    let mut seconds = 0f64;
    for captures in DURATION_TERM.captures_iter(trimmed) {
        let Some(term) = captures.get(0) else {
            continue;
        };
        if term.start() != consumed {
            return Err(format!("invalid duration '{trimmed}'"));
        }
        consumed = term.end();

        let number: f64 = captures["number"]
            .parse()
            .map_err(|e| format!("invalid number in duration '{trimmed}': {e}"))?;
        seconds += match &captures["unit"] {
            "h" => number * 3600.0,
            "m" => number * 60.0,
            "s" => number,
            "ms" => number / 1e3,
            "us" | "µs" => number / 1e6,
            _ => number / 1e9,
        };
    }
    if consumed != trimmed.len() {
        return Err(format!(
            "invalid duration '{trimmed}', expected e.g. '1m30s' or '12.5s'"
        ));
    }
    Ok(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        let cases = vec![
            (Duration::from_secs(45), "45s"),
            (Duration::from_millis(1500), "1.5s"),
            (Duration::from_secs(90), "1m30s"),
            (Duration::from_secs(3723), "1h2m3s"),
            (Duration::from_secs(3605), "1h0m5s"),
            (Duration::from_millis(350), "350ms"),
            (Duration::from_micros(1500), "1.5ms"),
            (Duration::ZERO, "0s"),
        ];
        for (input, expected) in cases {
            assert_eq!(format_duration(input), expected, "formatting {input:?}");
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1h2m3s").unwrap(), Duration::from_secs(3723));
        assert_eq!(parse_duration("12.5s").unwrap(), Duration::from_millis(12_500));
        assert_eq!(parse_duration("350ms").unwrap(), Duration::from_millis(350));
    }

    #[test]
    fn test_parse_duration_invalid() {
        for input in ["", "1x", "s", "1m 30s", "abc", "10"] {
            assert!(parse_duration(input).is_err(), "'{input}' should be invalid");
        }
    }

    #[test]
    fn test_format_then_parse_is_stable() {
        let d = Duration::from_millis(83_250);
        assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
    }
}
