pub mod keys;
pub mod memory;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{CheckData, Event, TagData, Trigger};

pub use memory::MemoryStore;
pub use redis::RedisStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis operation failed: {0}")]
    Redis(#[from] fred::error::Error),
    #[error("stored document is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("could not acquire check lock for '{0}' in {1} seconds")]
    LockTimeout(String, u64),
    #[error("maintenance update for '{0}' lost the swap race {1} times")]
    SwapExhausted(String, u32),
}

/// Typed facade over the key/value, set, sorted set and list primitives the
/// alerting core persists into. Two implementations exist: [`RedisStore`]
/// for production and [`MemoryStore`] for tests and local development.
///
/// Every operation that mutates cross-indexed state (trigger documents plus
/// their pattern/tag reverse indices, last-check plus the severity ranking)
/// is transactional: partial writes are never observable.
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads and normalizes a trigger document together with its tag set.
    async fn get_trigger(
        &self,
        id: &str,
    ) -> Result<Option<Trigger>, StoreError>;

    /// Writes the trigger document and reconciles the global trigger index,
    /// pattern and tag reverse indices against `existing`. Patterns that
    /// lose their last subscriber are cascade-removed together with their
    /// metrics.
    async fn save_trigger(
        &self,
        id: &str,
        trigger: &Trigger,
        existing: Option<&Trigger>,
    ) -> Result<(), StoreError>;

    /// Symmetric to [`Store::save_trigger`], with the same cascade rule.
    async fn remove_trigger(
        &self,
        id: &str,
        existing: &Trigger,
    ) -> Result<(), StoreError>;

    async fn get_triggers(&self) -> Result<Vec<String>, StoreError>;

    async fn get_patterns(&self) -> Result<Vec<String>, StoreError>;

    async fn add_pattern_metric(
        &self,
        pattern: &str,
        metric: &str,
    ) -> Result<(), StoreError>;

    async fn get_pattern_metrics(
        &self,
        pattern: &str,
    ) -> Result<Vec<String>, StoreError>;

    async fn del_pattern_metrics(
        &self,
        pattern: &str,
    ) -> Result<(), StoreError>;

    async fn get_pattern_triggers(
        &self,
        pattern: &str,
    ) -> Result<Vec<String>, StoreError>;

    async fn remove_pattern(&self, pattern: &str) -> Result<(), StoreError>;

    async fn remove_pattern_triggers(
        &self,
        pattern: &str,
    ) -> Result<(), StoreError>;

    /// Raw samples for each metric in the closed range `[from_ts, to_ts]`,
    /// in timestamp order. Each sample is the stored member string
    /// (`"<ts> <value>"`) paired with its score.
    async fn get_metrics_values(
        &self,
        metrics: &[String],
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<Vec<(String, i64)>>, StoreError>;

    /// Drops samples with timestamp <= `older_than`.
    async fn cleanup_metric_values(
        &self,
        metric: &str,
        older_than: i64,
    ) -> Result<(), StoreError>;

    async fn del_metric(&self, metric: &str) -> Result<(), StoreError>;

    /// Seconds per sample bucket; 60 when unset.
    async fn get_metric_retention(
        &self,
        metric: &str,
    ) -> Result<i64, StoreError>;

    /// Writes one sample and the pattern-metric link. Ingestion proper is
    /// out of scope; this is the seam tests and tooling use.
    async fn send_metric(
        &self,
        pattern: &str,
        metric: &str,
        timestamp: i64,
        value: f64,
    ) -> Result<(), StoreError>;

    async fn get_tag(&self, tag: &str) -> Result<TagData, StoreError>;

    async fn set_tag(
        &self,
        tag: &str,
        data: &TagData,
    ) -> Result<(), StoreError>;

    async fn get_trigger_last_check(
        &self,
        id: &str,
    ) -> Result<Option<CheckData>, StoreError>;

    /// Persists the snapshot and, in the same transaction, re-ranks the
    /// trigger in the severity sorted set and updates bad-state membership
    /// from the snapshot's score.
    async fn set_trigger_last_check(
        &self,
        id: &str,
        check: &CheckData,
    ) -> Result<(), StoreError>;

    async fn remove_trigger_last_check(
        &self,
        id: &str,
    ) -> Result<(), StoreError>;

    /// Set-if-absent with TTL. Returns whether the lock was acquired.
    async fn set_trigger_check_lock(
        &self,
        id: &str,
    ) -> Result<bool, StoreError>;

    /// Polls [`Store::set_trigger_check_lock`] every 0.5s until acquired or
    /// `timeout_secs` elapses, then fails with
    /// [`StoreError::LockTimeout`].
    async fn acquire_trigger_check_lock(
        &self,
        id: &str,
        timeout_secs: u64,
    ) -> Result<(), StoreError>;

    async fn del_trigger_check_lock(&self, id: &str)
        -> Result<(), StoreError>;

    async fn add_trigger_check(&self, id: &str) -> Result<(), StoreError>;

    /// Pops one pending trigger id, or None when the queue is empty.
    async fn get_trigger_to_check(&self)
        -> Result<Option<String>, StoreError>;

    /// Appends to the global event log and the per-trigger sorted set,
    /// trimming entries older than 30 days. `ui` additionally pushes to the
    /// capped UI list.
    async fn push_event(
        &self,
        event: &Event,
        ui: bool,
    ) -> Result<(), StoreError>;

    async fn get_events(
        &self,
        trigger_id: Option<&str>,
        start: i64,
        size: i64,
    ) -> Result<(Vec<Event>, usize), StoreError>;

    /// Read-patch-swap loop over the last-check snapshot setting
    /// `metrics[m].maintenance = until` for each entry, retried on
    /// concurrent modification.
    async fn set_trigger_metrics_maintenance(
        &self,
        id: &str,
        metrics: &HashMap<String, i64>,
    ) -> Result<(), StoreError>;

    /// Planned notification timestamp if still in the future, else 0.
    async fn get_trigger_throttling(
        &self,
        id: &str,
    ) -> Result<i64, StoreError>;

    async fn set_trigger_throttling(
        &self,
        id: &str,
        timestamp: i64,
    ) -> Result<(), StoreError>;

    async fn delete_trigger_throttling(
        &self,
        id: &str,
    ) -> Result<(), StoreError>;
}
