//! Processed-message tracking: an in-memory map for every platform and a
//! TTL-expiring JSON store for the issue tracker.

use std::{collections::HashMap, path::PathBuf};

use anyhow::{Context, Result};
use herald_core::{current_unix_timestamp_ms, is_older_than, write_text_atomic};
use herald_mentions::{Platform, WorkItem};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub(crate) const JIRA_PROCESSED_STORE_FILE: &str = "jira-processed.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProcessedMarker {
    pub(crate) id: String,
    pub(crate) timestamp_millis: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct InMemoryProcessedTracker {
    max_age_ms: u64,
    entries: HashMap<String, u64>,
}

impl InMemoryProcessedTracker {
    pub(crate) fn new(max_age_ms: u64) -> Self {
        Self {
            max_age_ms,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn is_processed_at(&self, id: &str, now_ms: u64) -> bool {
        self.entries
            .get(id)
            .is_some_and(|timestamp| !is_older_than(*timestamp, self.max_age_ms, now_ms))
    }

    /// Records `id`; returns false when a live marker already existed.
    pub(crate) fn mark_processed_at(&mut self, id: &str, now_ms: u64) -> bool {
        if self.is_processed_at(id, now_ms) {
            return false;
        }
        self.entries.insert(id.to_string(), now_ms);
        true
    }

    pub(crate) fn sweep_at(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        let max_age_ms = self.max_age_ms;
        self.entries
            .retain(|_, timestamp| !is_older_than(*timestamp, max_age_ms, now_ms));
        before - self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DurableProcessedStore {
    path: PathBuf,
    max_age_ms: u64,
}

impl DurableProcessedStore {
    pub(crate) fn new(path: PathBuf, max_age_ms: u64) -> Self {
        Self { path, max_age_ms }
    }

    fn read_markers(&self) -> Result<Vec<ProcessedMarker>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Vec<ProcessedMarker>>(&raw) {
            Ok(markers) => Ok(markers),
            Err(error) => {
                warn!(
                    path = %self.path.display(),
                    %error,
                    "failed to parse processed-message store (starting fresh)"
                );
                Ok(Vec::new())
            }
        }
    }

    fn write_markers(&self, markers: &[ProcessedMarker]) -> Result<()> {
        let mut payload =
            serde_json::to_string_pretty(markers).context("failed to serialize markers")?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }

    /// Loads the live markers, rewriting the file when any entry has expired.
    pub(crate) fn load_live_at(&self, now_ms: u64) -> Result<Vec<ProcessedMarker>> {
        let markers = self.read_markers()?;
        let total = markers.len();
        let live = markers
            .into_iter()
            .filter(|marker| !is_older_than(marker.timestamp_millis, self.max_age_ms, now_ms))
            .collect::<Vec<_>>();
        if live.len() != total {
            self.write_markers(&live)?;
        }
        Ok(live)
    }

    pub(crate) fn is_processed_at(&self, id: &str, now_ms: u64) -> Result<bool> {
        Ok(self
            .load_live_at(now_ms)?
            .iter()
            .any(|marker| marker.id == id))
    }

    /// Records `id`; returns false when a live marker already existed.
    pub(crate) fn mark_processed_at(&self, id: &str, now_ms: u64) -> Result<bool> {
        let mut live = self.load_live_at(now_ms)?;
        if live.iter().any(|marker| marker.id == id) {
            return Ok(false);
        }
        live.push(ProcessedMarker {
            id: id.to_string(),
            timestamp_millis: now_ms,
        });
        self.write_markers(&live)?;
        Ok(true)
    }

    pub(crate) fn sweep_at(&self, now_ms: u64) -> Result<usize> {
        let before = self.read_markers()?.len();
        let after = self.load_live_at(now_ms)?.len();
        Ok(before.saturating_sub(after))
    }
}

/// Combined tracker: every message id lives in memory; issue-tracker ids are
/// also persisted so they survive restarts.
#[derive(Debug)]
pub(crate) struct IdempotencyTracker {
    memory: InMemoryProcessedTracker,
    durable: Option<DurableProcessedStore>,
}

impl IdempotencyTracker {
    pub(crate) fn new(max_age_ms: u64, durable: Option<DurableProcessedStore>) -> Self {
        Self {
            memory: InMemoryProcessedTracker::new(max_age_ms),
            durable,
        }
    }

    fn durable_for(&self, platform: Platform) -> Option<&DurableProcessedStore> {
        match platform {
            Platform::Jira => self.durable.as_ref(),
            Platform::Gitlab => None,
        }
    }

    pub(crate) fn is_processed(&self, item: &WorkItem) -> Result<bool> {
        let now_ms = current_unix_timestamp_ms();
        if self
            .memory
            .is_processed_at(&item.triggering_message_id, now_ms)
        {
            return Ok(true);
        }
        match self.durable_for(item.platform) {
            Some(store) => store.is_processed_at(&item.triggering_message_id, now_ms),
            None => Ok(false),
        }
    }

    /// Persists first; the in-memory marker is set only once the durable write succeeded.
    pub(crate) fn mark_processed(&mut self, item: &WorkItem) -> Result<()> {
        let now_ms = current_unix_timestamp_ms();
        if let Some(store) = self.durable_for(item.platform) {
            store.mark_processed_at(&item.triggering_message_id, now_ms)?;
        }
        self.memory
            .mark_processed_at(&item.triggering_message_id, now_ms);
        Ok(())
    }

    pub(crate) fn sweep(&mut self) -> Result<usize> {
        let now_ms = current_unix_timestamp_ms();
        let mut removed = self.memory.sweep_at(now_ms);
        if let Some(store) = self.durable.as_ref() {
            removed = removed.saturating_add(store.sweep_at(now_ms)?);
        }
        Ok(removed)
    }

    #[cfg(test)]
    pub(crate) fn in_memory_len(&self) -> usize {
        self.memory.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DurableProcessedStore, IdempotencyTracker, InMemoryProcessedTracker, ProcessedMarker,
    };
    use herald_mentions::{Platform, ResourceRef, WorkItem};

    const DAY_MS: u64 = 86_400_000;

    fn jira_item(comment_id: &str) -> WorkItem {
        WorkItem {
            platform: Platform::Jira,
            resource: ResourceRef::Issue {
                project_key: "OPS".to_string(),
                key: "OPS-1".to_string(),
            },
            triggering_message_id: format!("jira-comment:OPS-1:{comment_id}"),
            author_id: "u-1".to_string(),
            body: "[~accountid:bot] analyze".to_string(),
            created_at: "2026-03-01T10:00:00Z".to_string(),
            thread_hint: Some(comment_id.to_string()),
        }
    }

    #[test]
    fn unit_in_memory_tracker_expires_after_max_age() {
        let mut tracker = InMemoryProcessedTracker::new(1_000);
        assert!(tracker.mark_processed_at("m-1", 10_000));
        assert!(!tracker.mark_processed_at("m-1", 10_500));
        assert!(tracker.is_processed_at("m-1", 11_000));
        assert!(!tracker.is_processed_at("m-1", 11_001));
        assert_eq!(tracker.sweep_at(11_001), 1);
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn functional_durable_store_survives_reload() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("jira-processed.json");
        let store = DurableProcessedStore::new(path.clone(), 7 * DAY_MS);
        assert!(store.mark_processed_at("jira-comment:OPS-1:10", 5_000).expect("mark"));

        let reopened = DurableProcessedStore::new(path.clone(), 7 * DAY_MS);
        assert!(reopened
            .is_processed_at("jira-comment:OPS-1:10", 6_000)
            .expect("read"));
        let raw = std::fs::read_to_string(&path).expect("raw");
        let markers: Vec<ProcessedMarker> = serde_json::from_str(&raw).expect("markers");
        assert_eq!(markers[0].timestamp_millis, 5_000);
        assert!(raw.contains("\"timestampMillis\": 5000"));
    }

    #[test]
    fn integration_durable_store_rewrites_only_when_entries_expire() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("jira-processed.json");
        let compact = r#"[{"id":"old","timestampMillis":1000},{"id":"new","timestampMillis":9000000000}]"#;
        std::fs::write(&path, compact).expect("seed");
        let store = DurableProcessedStore::new(path.clone(), DAY_MS);

        let live = store.load_live_at(9_000_001_000).expect("load");
        assert_eq!(live.len(), 1);
        let rewritten = std::fs::read_to_string(&path).expect("rewritten");
        assert_ne!(rewritten, compact);
        assert!(!rewritten.contains("\"old\""));

        std::fs::write(&path, compact.replace("1000}", "9000000500}")).expect("reseed");
        let untouched_before = std::fs::read_to_string(&path).expect("before");
        let live = store.load_live_at(9_000_001_000).expect("load");
        assert_eq!(live.len(), 2);
        assert_eq!(
            std::fs::read_to_string(&path).expect("after"),
            untouched_before
        );
    }

    #[test]
    fn regression_durable_store_treats_corrupt_file_as_empty() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("jira-processed.json");
        std::fs::write(&path, "{not json").expect("seed");
        let store = DurableProcessedStore::new(path.clone(), DAY_MS);
        assert!(!store.is_processed_at("x", 10).expect("read"));
        assert!(store.mark_processed_at("x", 10).expect("mark"));
        assert!(store.is_processed_at("x", 11).expect("read"));
    }

    #[test]
    fn integration_idempotency_tracker_persists_only_issue_tracker_ids() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("jira-processed.json");
        let mut tracker = IdempotencyTracker::new(
            7 * DAY_MS,
            Some(DurableProcessedStore::new(path.clone(), 7 * DAY_MS)),
        );
        let item = jira_item("10");
        assert!(!tracker.is_processed(&item).expect("check"));
        tracker.mark_processed(&item).expect("mark");
        assert!(tracker.is_processed(&item).expect("check"));

        let restarted = IdempotencyTracker::new(
            7 * DAY_MS,
            Some(DurableProcessedStore::new(path, 7 * DAY_MS)),
        );
        assert_eq!(restarted.in_memory_len(), 0);
        assert!(restarted.is_processed(&item).expect("check"));
        assert!(!restarted.is_processed(&jira_item("11")).expect("check"));
    }

    #[test]
    fn regression_failed_durable_write_leaves_message_unprocessed() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let blocker = tempdir.path().join("state");
        std::fs::write(&blocker, "not a directory").expect("blocker");
        let mut tracker = IdempotencyTracker::new(
            7 * DAY_MS,
            Some(DurableProcessedStore::new(
                blocker.join("jira-processed.json"),
                7 * DAY_MS,
            )),
        );
        let item = jira_item("12");

        assert!(tracker.mark_processed(&item).is_err());
        assert_eq!(tracker.in_memory_len(), 0);
        assert!(!tracker.is_processed(&item).expect("check"));

        std::fs::remove_file(&blocker).expect("unblock");
        tracker.mark_processed(&item).expect("mark");
        assert!(tracker.is_processed(&item).expect("check"));
    }
}
