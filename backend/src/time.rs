use chrono::{DateTime, TimeZone, Utc};

/// Current wall time, milliseconds since epoch.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Millisecond timestamp to wall time; falls back to now for timestamps
/// outside chrono's representable range.
pub fn datetime_from_ms(ts_ms: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts_ms as i64)
        .single()
        .unwrap_or_else(Utc::now)
}
