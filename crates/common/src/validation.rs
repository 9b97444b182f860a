//! Small input and time helpers shared by both services.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in seconds, safe against clocks before the epoch.
pub fn safe_unix_timestamp() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_secs(),
        Err(e) => {
            tracing::warn!(error = %e, "system clock is before the UNIX epoch, using 0");
            0
        }
    }
}

/// Parse an `HH:MM` wall-clock string such as an org's `check_in_end`.
///
/// Returns `None` for anything that is not a valid 24h time.
pub fn parse_hhmm(value: &str) -> Option<(u32, u32)> {
    let (hours, minutes) = value.split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some((hours, minutes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_after_2023() {
        assert!(safe_unix_timestamp() > 1_700_000_000);
    }

    #[test]
    fn parses_valid_times() {
        assert_eq!(parse_hhmm("09:30"), Some((9, 30)));
        assert_eq!(parse_hhmm("00:00"), Some((0, 0)));
        assert_eq!(parse_hhmm("23:59"), Some((23, 59)));
    }

    #[test]
    fn rejects_invalid_times() {
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("09:60"), None);
        assert_eq!(parse_hhmm("0930"), None);
        assert_eq!(parse_hhmm("nine:thirty"), None);
        assert_eq!(parse_hhmm(""), None);
    }
}
