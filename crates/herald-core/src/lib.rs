//! Foundational low-level utilities shared across Herald crates.
//!
//! Provides the atomic file-write helper used by the durable dedup store and
//! the time helpers used for marker expiry.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::{current_unix_timestamp_ms, days_to_ms, is_older_than};

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use super::*;

    #[test]
    fn unit_days_to_ms_saturates() {
        assert_eq!(days_to_ms(1), 86_400_000);
        assert_eq!(days_to_ms(u64::MAX), u64::MAX);
    }

    #[test]
    fn unit_is_older_than_is_strict() {
        let now = current_unix_timestamp_ms();
        assert!(!is_older_than(now, 1_000, now));
        assert!(!is_older_than(now - 1_000, 1_000, now));
        assert!(is_older_than(now - 1_001, 1_000, now));
        assert!(!is_older_than(now + 5_000, 1_000, now));
    }

    #[test]
    fn functional_write_text_atomic_writes_and_replaces_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested").join("sample.json");
        write_text_atomic(&path, "first").expect("write");
        write_text_atomic(&path, "second").expect("rewrite");
        assert_eq!(read_to_string(&path).expect("read"), "second");
    }

    #[test]
    fn regression_write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "x").expect_err("directory");
        assert!(error.to_string().contains("is a directory"));
    }
}
