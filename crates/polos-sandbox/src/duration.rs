//! Human-readable duration parsing (`"30m"`, `"1h"`, `"3d"`), grounded in
//! `examples/original_source/sdk/python/polos/execution/sandbox_manager.py`'s
//! `parse_duration`.

use std::time::Duration;

use regex::Regex;
use std::sync::LazyLock;

use crate::error::SandboxError;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)?)\s*(m|h|d)$").unwrap());

pub fn parse_duration(s: &str) -> Result<Duration, SandboxError> {
    let trimmed = s.trim();
    let caps = DURATION_RE.captures(trimmed).ok_or_else(|| SandboxError::InvalidDuration(s.to_string()))?;
    let value: f64 = caps[1].parse().map_err(|_| SandboxError::InvalidDuration(s.to_string()))?;
    let seconds = match &caps[2] {
        "m" => value * 60.0,
        "h" => value * 3600.0,
        "d" => value * 86400.0,
        _ => return Err(SandboxError::InvalidDuration(s.to_string())),
    };
    Ok(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minutes_hours_and_days() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("3d").unwrap(), Duration::from_secs(3 * 86400));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("10x").is_err());
    }
}
