//! Check interval parsing.

use std::time::Duration;

/// Parse a resource's `check_every` string (e.g. `"30s"`, `"1h 30m"`).
///
/// Zero-length intervals are rejected: the interval doubles as the checking
/// lease TTL.
pub fn parse_check_interval(value: &str) -> crate::Result<Duration> {
    let interval =
        humantime::parse_duration(value.trim()).map_err(|e| crate::Error::InvalidInterval {
            value: value.to_string(),
            reason: e.to_string(),
        })?;

    if interval.is_zero() {
        return Err(crate::Error::InvalidInterval {
            value: value.to_string(),
            reason: "interval must be greater than zero".to_string(),
        });
    }

    Ok(interval)
}
