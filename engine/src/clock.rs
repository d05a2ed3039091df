//! Backend commit clock and timestamp encoding.
//!
//! Every document carries `createdAt` and `lastUpdated` as RFC 3339 strings
//! assigned by the backend at commit time. The clock is strictly monotonic so
//! that a later commit on the same backend always carries a later instant,
//! even when the wall clock stalls or steps backwards.

use crate::Timestamp;
use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};

/// A strictly increasing millisecond clock.
#[derive(Debug, Default)]
pub struct ServerClock {
    last_millis: AtomicI64,
}

impl ServerClock {
    /// Create a clock with no history.
    pub fn new() -> Self {
        Self {
            last_millis: AtomicI64::new(0),
        }
    }

    /// Return the next commit instant.
    ///
    /// The result is the wall clock when it has advanced past the previous
    /// value, otherwise the previous value plus one millisecond.
    pub fn now(&self) -> Timestamp {
        let wall = Utc::now().timestamp_millis();
        let mut prev = self.last_millis.load(Ordering::Acquire);
        loop {
            let next = wall.max(prev + 1);
            match self.last_millis.compare_exchange_weak(
                prev,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return millis_to_timestamp(next),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Raise the clock floor so that future instants are after `seen`.
    pub fn observe(&self, seen: Timestamp) {
        self.last_millis
            .fetch_max(seen.timestamp_millis(), Ordering::AcqRel);
    }
}

fn millis_to_timestamp(millis: i64) -> Timestamp {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Encode a timestamp the way documents store it.
pub fn format_timestamp(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Decode a stored timestamp field.
///
/// Accepts RFC 3339 strings, epoch milliseconds, and the legacy date-only
/// `YYYY-MM-DD` form (read as midnight UTC).
pub fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|naive| Utc.from_utc_datetime(&naive))
            }),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}
