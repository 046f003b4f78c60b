use std::time::Duration;

use chrono::{DateTime, Utc};

/// Return true when an HTTP status warrants another attempt.
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 409 || status == 425 || status == 429 || status >= 500
}

pub fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

/// Parse a `retry-after` header given either as seconds or as an HTTP date.
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    Some(Duration::from_millis(u64::try_from(delay_ms).unwrap_or(0)))
}

/// Exponential backoff capped at 64x the base, overridden by a larger `retry-after`.
pub fn retry_delay(base_delay_ms: u64, attempt: usize, retry_after: Option<Duration>) -> Duration {
    let shift = attempt.saturating_sub(1).min(6) as u32;
    let backoff = Duration::from_millis(base_delay_ms.saturating_mul(1_u64 << shift));
    match retry_after {
        Some(retry_after) => backoff.max(retry_after),
        None => backoff,
    }
}

/// Truncate error bodies on a character boundary for logs and comments.
pub fn truncate_for_error(raw: &str, max_chars: usize) -> String {
    if raw.chars().count() <= max_chars {
        return raw.to_string();
    }
    let truncated = raw.chars().take(max_chars).collect::<String>();
    format!("{truncated}...")
}
