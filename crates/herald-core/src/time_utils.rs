/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Converts a day count into milliseconds, saturating on overflow.
pub fn days_to_ms(days: u64) -> u64 {
    days.saturating_mul(86_400_000)
}

/// Returns true when a record stamped at `timestamp_ms` is strictly older than `max_age_ms`.
pub fn is_older_than(timestamp_ms: u64, max_age_ms: u64, now_ms: u64) -> bool {
    now_ms.saturating_sub(timestamp_ms) > max_age_ms
}
