//! Timestamps and clocks.
//!
//! Recalculation timestamps double as fencing tokens, so they are always
//! truncated to millisecond precision and serialized in a fixed-width
//! RFC 3339 form (`2024-05-01T12:00:00.000Z`). That form orders the same
//! lexicographically and chronologically, which lets string-typed backends
//! compare them in conditional writes.

use std::sync::Mutex;

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use crate::error::TimestampError;

/// A recalculation timestamp.
pub type Timestamp = DateTime<Utc>;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time, truncated to milliseconds.
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        truncate_to_millis(Utc::now())
    }
}

/// Manually driven clock for deterministic tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    ///
    /// # Arguments
    /// * `start` - Initial time
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(truncate_to_millis(start)),
        }
    }

    /// Move the clock to an absolute time.
    ///
    /// # Arguments
    /// * `to` - New current time
    pub fn set(&self, to: Timestamp) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = truncate_to_millis(to);
    }

    /// Advance the clock by a number of milliseconds.
    ///
    /// # Arguments
    /// * `millis` - Milliseconds to move forward
    pub fn advance_ms(&self, millis: i64) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += Duration::milliseconds(millis);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Format a timestamp for persistence.
/// Returns: "YYYY-MM-DDTHH:MM:SS.mmmZ"
///
/// # Arguments
/// * `ts` - Timestamp to format
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a persisted timestamp in the canonical form written by
/// [`format_timestamp`].
///
/// Stores compare timestamps as strings, which only orders them by time when
/// every value has the same fixed-width UTC millisecond form. Other RFC 3339
/// spellings of a valid instant (offsets, missing or extra fractional
/// digits) are rejected.
///
/// # Arguments
/// * `value` - Timestamp string
///
/// # Errors
/// Returns `TimestampError` if the value is not valid RFC 3339 or not in
/// canonical form.
pub fn parse_timestamp(value: &str) -> Result<Timestamp, TimestampError> {
    let ts: Timestamp = DateTime::parse_from_rfc3339(value)
        .map(|dt| truncate_to_millis(dt.with_timezone(&Utc)))
        .map_err(|e| TimestampError {
            value: value.to_string(),
            message: e.to_string(),
        })?;

    let canonical: String = format_timestamp(&ts);
    if canonical != value {
        return Err(TimestampError {
            value: value.to_string(),
            message: format!("not in canonical form (expected {})", canonical),
        });
    }
    Ok(ts)
}

/// Pick the timestamp a new commit should carry.
///
/// Normally `now`. If the clock has not moved past a timestamp already
/// observed on the record, the next millisecond after it is used instead so
/// the commit can still pass the strictly-later fence.
///
/// # Arguments
/// * `now` - Current time
/// * `observed` - Latest recalculation timestamp seen on the record, if any
pub fn next_fencing_timestamp(now: Timestamp, observed: Option<Timestamp>) -> Timestamp {
    let now: Timestamp = truncate_to_millis(now);
    match observed {
        Some(prior) if prior >= now => prior + Duration::milliseconds(1),
        _ => now,
    }
}

fn truncate_to_millis(ts: Timestamp) -> Timestamp {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_format_and_parse() {
        let formatted: String = format_timestamp(&t0());
        assert_eq!(formatted, "2024-05-01T12:00:00.000Z");
        assert_eq!(parse_timestamp(&formatted).unwrap(), t0());
    }

    #[test]
    fn test_parse_rejects_non_canonical_forms() {
        for value in [
            "2024-05-01T14:00:00.000+02:00",
            "2024-05-01T12:00:00Z",
            "2024-05-01T12:00:00.000000Z",
        ] {
            let err: TimestampError = parse_timestamp(value).unwrap_err();
            assert!(err.message.contains("canonical"), "{}: {}", value, err);
        }
        // The short form would sort after a later canonical value
        assert!("2024-05-01T12:00:00Z" > "2024-05-01T12:00:00.500Z");
    }

    #[test]
    fn test_parse_invalid() {
        let err: TimestampError = parse_timestamp("yesterday").unwrap_err();
        assert_eq!(err.value, "yesterday");
    }

    #[test]
    fn test_formatted_order_matches_time_order() {
        let a: String = format_timestamp(&t0());
        let b: String = format_timestamp(&(t0() + Duration::milliseconds(1)));
        let c: String = format_timestamp(&(t0() + Duration::seconds(10)));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_next_fencing_timestamp() {
        assert_eq!(next_fencing_timestamp(t0(), None), t0());

        let earlier: Timestamp = t0() - Duration::seconds(1);
        assert_eq!(next_fencing_timestamp(t0(), Some(earlier)), t0());

        let later: Timestamp = t0() + Duration::seconds(1);
        assert_eq!(
            next_fencing_timestamp(t0(), Some(later)),
            later + Duration::milliseconds(1)
        );
        assert_eq!(
            next_fencing_timestamp(t0(), Some(t0())),
            t0() + Duration::milliseconds(1)
        );
    }

    #[test]
    fn test_manual_clock() {
        let clock: ManualClock = ManualClock::new(t0());
        assert_eq!(clock.now(), t0());
        clock.advance_ms(1500);
        assert_eq!(clock.now(), t0() + Duration::milliseconds(1500));
        clock.set(t0());
        assert_eq!(clock.now(), t0());
    }
}
