use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use super::keys;
use super::{Store, StoreError};
use crate::prelude::*;
use crate::types::{CheckData, Event, TagData, Trigger};

/// In-memory model of the same key space [`super::RedisStore`] talks to.
/// Used by tests and local development; every mutation is atomic under one
/// lock, which subsumes the transactional guarantees of the Redis edition.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Shelf>,
    check_lock_ttl: i64,
}

#[derive(Default)]
struct Shelf {
    kv: HashMap<String, String>,
    kv_expiry: HashMap<String, Instant>,
    sets: HashMap<String, BTreeSet<String>>,
    // Sorted by (score, member), member-unique, mirroring redis ordering.
    zsets: HashMap<String, Vec<(f64, String)>>,
    // Index 0 is the head (LPUSH side).
    lists: HashMap<String, Vec<String>>,
}

impl Shelf {
    fn sadd(&mut self, key: &str, member: &str) {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
    }

    fn srem(&mut self, key: &str, member: &str) {
        if let Some(set) = self.sets.get_mut(key) {
            set.remove(member);
        }
    }

    fn smembers(&self, key: &str) -> Vec<String> {
        self.sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn spop(&mut self, key: &str) -> Option<String> {
        let set = self.sets.get_mut(key)?;
        let member = set.iter().next().cloned()?;
        set.remove(&member);
        Some(member)
    }

    fn zadd(&mut self, key: &str, score: f64, member: &str) {
        let zset = self.zsets.entry(key.to_string()).or_default();
        zset.retain(|(_, m)| m != member);
        zset.push((score, member.to_string()));
        zset.sort_by(|(sa, ma), (sb, mb)| {
            sa.total_cmp(sb).then_with(|| ma.cmp(mb))
        });
    }

    fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Vec<(String, f64)> {
        self.zsets
            .get(key)
            .map(|zset| {
                zset.iter()
                    .filter(|(score, _)| *score >= min && *score <= max)
                    .map(|(score, member)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn zremrangebyscore(&mut self, key: &str, min: f64, max: f64) {
        if let Some(zset) = self.zsets.get_mut(key) {
            zset.retain(|(score, _)| *score < min || *score > max);
        }
    }

    fn lpush(&mut self, key: &str, value: &str) {
        self.lists
            .entry(key.to_string())
            .or_default()
            .insert(0, value.to_string());
    }

    fn get(&mut self, key: &str) -> Option<String> {
        if let Some(expiry) = self.kv_expiry.get(key) {
            if Instant::now() >= *expiry {
                self.kv.remove(key);
                self.kv_expiry.remove(key);
            }
        }
        self.kv.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.kv.insert(key.to_string(), value);
        self.kv_expiry.remove(key);
    }

    fn set_nx_ex(&mut self, key: &str, value: String, ttl: Duration) -> bool {
        if self.get(key).is_some() {
            return false;
        }
        self.kv.insert(key.to_string(), value);
        self.kv_expiry
            .insert(key.to_string(), Instant::now() + ttl);
        true
    }

    fn del(&mut self, key: &str) {
        self.kv.remove(key);
        self.kv_expiry.remove(key);
        self.sets.remove(key);
        self.zsets.remove(key);
        self.lists.remove(key);
    }
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore {
            inner: Mutex::default(),
            check_lock_ttl: 30,
        }
    }

    pub fn with_check_lock_ttl(check_lock_ttl: i64) -> MemoryStore {
        MemoryStore {
            inner: Mutex::default(),
            check_lock_ttl,
        }
    }

    /// Per-metric retention override, the seam tests use instead of a
    /// carbon-side schema.
    pub fn set_metric_retention(&self, metric: &str, retention: i64) {
        self.inner
            .lock()
            .unwrap()
            .set(&keys::metric_retention(metric), retention.to_string());
    }

    /// Whether the pattern is still present in the global pattern index.
    pub fn has_pattern(&self, pattern: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .smembers(keys::PATTERNS)
            .contains(&pattern.to_string())
    }

    /// Raw sample count for one metric, bypassing range filters.
    pub fn metric_sample_count(&self, metric: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .zsets
            .get(&keys::metric_data(metric))
            .map(|z| z.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_trigger(
        &self,
        id: &str,
    ) -> Result<Option<Trigger>, StoreError> {
        let mut shelf = self.inner.lock().unwrap();
        let Some(json) = shelf.get(&keys::trigger(id)) else {
            return Ok(None);
        };
        let tags = shelf.smembers(&keys::trigger_tags(id));
        let trigger: Trigger = serde_json::from_str(&json)?;
        Ok(Some(trigger.normalize(id, tags)))
    }

    async fn save_trigger(
        &self,
        id: &str,
        trigger: &Trigger,
        existing: Option<&Trigger>,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(trigger)?;
        let mut shelf = self.inner.lock().unwrap();
        let mut cleanup_patterns: Vec<&str> = Vec::new();

        if let Some(existing) = existing {
            for pattern in existing
                .patterns
                .iter()
                .filter(|p| !trigger.patterns.contains(p))
            {
                shelf.srem(&keys::pattern_triggers(pattern), id);
                cleanup_patterns.push(pattern);
            }
            for tag in existing
                .tags
                .iter()
                .filter(|t| !trigger.tags.contains(t))
            {
                shelf.srem(&keys::trigger_tags(id), tag);
                shelf.srem(&keys::tag_triggers(tag), id);
            }
        }
        shelf.set(&keys::trigger(id), json);
        shelf.sadd(keys::TRIGGERS, id);
        for pattern in &trigger.patterns {
            shelf.sadd(keys::PATTERNS, pattern);
            shelf.sadd(&keys::pattern_triggers(pattern), id);
        }
        for tag in &trigger.tags {
            shelf.sadd(&keys::trigger_tags(id), tag);
            shelf.sadd(&keys::tag_triggers(tag), id);
            shelf.sadd(keys::TAGS, tag);
        }

        for pattern in cleanup_patterns {
            if shelf.smembers(&keys::pattern_triggers(pattern)).is_empty() {
                shelf.del(&keys::pattern_triggers(pattern));
                shelf.srem(keys::PATTERNS, pattern);
                for metric in shelf.smembers(&keys::pattern_metrics(pattern))
                {
                    shelf.del(&keys::metric_data(&metric));
                }
                shelf.del(&keys::pattern_metrics(pattern));
            }
        }
        Ok(())
    }

    async fn remove_trigger(
        &self,
        id: &str,
        existing: &Trigger,
    ) -> Result<(), StoreError> {
        let mut shelf = self.inner.lock().unwrap();
        shelf.del(&keys::trigger(id));
        shelf.del(&keys::trigger_tags(id));
        shelf.srem(keys::TRIGGERS, id);
        for tag in &existing.tags {
            shelf.srem(&keys::tag_triggers(tag), id);
        }
        for pattern in &existing.patterns {
            shelf.srem(&keys::pattern_triggers(pattern), id);
        }
        for pattern in &existing.patterns {
            if shelf.smembers(&keys::pattern_triggers(pattern)).is_empty() {
                shelf.srem(keys::PATTERNS, pattern);
                for metric in shelf.smembers(&keys::pattern_metrics(pattern))
                {
                    shelf.del(&keys::metric_data(&metric));
                }
                shelf.del(&keys::pattern_metrics(pattern));
            }
        }
        Ok(())
    }

    async fn get_triggers(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.lock().unwrap().smembers(keys::TRIGGERS))
    }

    async fn get_patterns(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.lock().unwrap().smembers(keys::PATTERNS))
    }

    async fn add_pattern_metric(
        &self,
        pattern: &str,
        metric: &str,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .sadd(&keys::pattern_metrics(pattern), metric);
        Ok(())
    }

    async fn get_pattern_metrics(
        &self,
        pattern: &str,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .smembers(&keys::pattern_metrics(pattern)))
    }

    async fn del_pattern_metrics(
        &self,
        pattern: &str,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .del(&keys::pattern_metrics(pattern));
        Ok(())
    }

    async fn get_pattern_triggers(
        &self,
        pattern: &str,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .smembers(&keys::pattern_triggers(pattern)))
    }

    async fn remove_pattern(&self, pattern: &str) -> Result<(), StoreError> {
        self.inner.lock().unwrap().srem(keys::PATTERNS, pattern);
        Ok(())
    }

    async fn remove_pattern_triggers(
        &self,
        pattern: &str,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .del(&keys::pattern_triggers(pattern));
        Ok(())
    }

    async fn get_metrics_values(
        &self,
        metrics: &[String],
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<Vec<(String, i64)>>, StoreError> {
        let shelf = self.inner.lock().unwrap();
        Ok(metrics
            .iter()
            .map(|metric| {
                shelf
                    .zrangebyscore(
                        &keys::metric_data(metric),
                        from_ts as f64,
                        to_ts as f64,
                    )
                    .into_iter()
                    .map(|(member, score)| (member, score as i64))
                    .collect()
            })
            .collect())
    }

    async fn cleanup_metric_values(
        &self,
        metric: &str,
        older_than: i64,
    ) -> Result<(), StoreError> {
        self.inner.lock().unwrap().zremrangebyscore(
            &keys::metric_data(metric),
            f64::NEG_INFINITY,
            older_than as f64,
        );
        Ok(())
    }

    async fn del_metric(&self, metric: &str) -> Result<(), StoreError> {
        self.inner.lock().unwrap().del(&keys::metric_data(metric));
        Ok(())
    }

    async fn get_metric_retention(
        &self,
        metric: &str,
    ) -> Result<i64, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .get(&keys::metric_retention(metric))
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(60))
    }

    async fn send_metric(
        &self,
        pattern: &str,
        metric: &str,
        timestamp: i64,
        value: f64,
    ) -> Result<(), StoreError> {
        let mut shelf = self.inner.lock().unwrap();
        shelf.zadd(
            &keys::metric_data(metric),
            timestamp as f64,
            &format!("{timestamp} {value}"),
        );
        shelf.sadd(&keys::pattern_metrics(pattern), metric);
        Ok(())
    }

    async fn get_tag(&self, tag: &str) -> Result<TagData, StoreError> {
        match self.inner.lock().unwrap().get(&keys::tag(tag)) {
            | None => Ok(TagData::default()),
            | Some(json) => Ok(serde_json::from_str(&json)?),
        }
    }

    async fn set_tag(
        &self,
        tag: &str,
        data: &TagData,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(data)?;
        self.inner.lock().unwrap().set(&keys::tag(tag), json);
        Ok(())
    }

    async fn get_trigger_last_check(
        &self,
        id: &str,
    ) -> Result<Option<CheckData>, StoreError> {
        match self.inner.lock().unwrap().get(&keys::last_check(id)) {
            | None => Ok(None),
            | Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        }
    }

    async fn set_trigger_last_check(
        &self,
        id: &str,
        check: &CheckData,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(check)?;
        let score = check.score.unwrap_or(0);
        let mut shelf = self.inner.lock().unwrap();
        shelf.set(&keys::last_check(id), json);
        shelf.zadd(keys::TRIGGERS_CHECKS, score as f64, id);
        let counter = shelf
            .get(keys::CHECKS_COUNTER)
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0);
        shelf.set(keys::CHECKS_COUNTER, (counter + 1).to_string());
        if score > 0 {
            shelf.sadd(keys::TRIGGER_IN_BAD_STATE, id);
        } else {
            shelf.srem(keys::TRIGGER_IN_BAD_STATE, id);
        }
        Ok(())
    }

    async fn remove_trigger_last_check(
        &self,
        id: &str,
    ) -> Result<(), StoreError> {
        self.inner.lock().unwrap().del(&keys::last_check(id));
        Ok(())
    }

    async fn set_trigger_check_lock(
        &self,
        id: &str,
    ) -> Result<bool, StoreError> {
        let now = Utc::now().timestamp();
        Ok(self.inner.lock().unwrap().set_nx_ex(
            &keys::check_lock(id),
            now.to_string(),
            Duration::from_secs(self.check_lock_ttl.max(0) as u64),
        ))
    }

    async fn acquire_trigger_check_lock(
        &self,
        id: &str,
        timeout_secs: u64,
    ) -> Result<(), StoreError> {
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        loop {
            if self.set_trigger_check_lock(id).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(StoreError::LockTimeout(
                    id.to_string(),
                    timeout_secs,
                ));
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn del_trigger_check_lock(
        &self,
        id: &str,
    ) -> Result<(), StoreError> {
        self.inner.lock().unwrap().del(&keys::check_lock(id));
        Ok(())
    }

    async fn add_trigger_check(&self, id: &str) -> Result<(), StoreError> {
        self.inner.lock().unwrap().sadd(keys::TRIGGERS_TO_CHECK, id);
        Ok(())
    }

    async fn get_trigger_to_check(
        &self,
    ) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().unwrap().spop(keys::TRIGGERS_TO_CHECK))
    }

    async fn push_event(
        &self,
        event: &Event,
        ui: bool,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(event)?;
        let horizon = (Utc::now().timestamp() - TRIGGER_EVENTS_TTL) as f64;
        let mut shelf = self.inner.lock().unwrap();
        shelf.lpush(keys::EVENTS, &json);
        let trigger_events = keys::trigger_events(&event.trigger_id);
        shelf.zadd(&trigger_events, event.timestamp as f64, &json);
        shelf.zremrangebyscore(
            &trigger_events,
            f64::NEG_INFINITY,
            horizon,
        );
        if ui {
            shelf.lpush(keys::EVENTS_UI, &json);
            if let Some(list) = shelf.lists.get_mut(keys::EVENTS_UI) {
                list.truncate(101);
            }
        }
        Ok(())
    }

    async fn get_events(
        &self,
        trigger_id: Option<&str>,
        start: i64,
        size: i64,
    ) -> Result<(Vec<Event>, usize), StoreError> {
        let shelf = self.inner.lock().unwrap();
        let (raw, total): (Vec<String>, usize) = match trigger_id {
            | None => {
                let list = shelf
                    .lists
                    .get(keys::EVENTS_UI)
                    .cloned()
                    .unwrap_or_default();
                let total = list.len();
                (list, total)
            }
            | Some(id) => {
                let key = keys::trigger_events(id);
                let zset = shelf.zsets.get(&key).cloned().unwrap_or_default();
                let total = zset.len();
                let raw = zset
                    .iter()
                    .rev()
                    .skip(start.max(0) as usize)
                    .take((size.max(0) as usize) + 1)
                    .map(|(_, member)| member.clone())
                    .collect();
                (raw, total)
            }
        };
        let events = raw
            .iter()
            .map(|json| serde_json::from_str(json))
            .collect::<Result<Vec<Event>, _>>()?;
        Ok((events, total))
    }

    async fn set_trigger_metrics_maintenance(
        &self,
        id: &str,
        metrics: &HashMap<String, i64>,
    ) -> Result<(), StoreError> {
        let mut shelf = self.inner.lock().unwrap();
        let key = keys::last_check(id);
        let Some(json) = shelf.get(&key) else {
            return Ok(());
        };
        let mut check: CheckData = serde_json::from_str(&json)?;
        for (metric, until) in metrics {
            if let Some(state) = check.metrics.get_mut(metric) {
                state.maintenance = Some(*until);
            }
        }
        shelf.set(&key, serde_json::to_string(&check)?);
        Ok(())
    }

    async fn get_trigger_throttling(
        &self,
        id: &str,
    ) -> Result<i64, StoreError> {
        let raw = self.inner.lock().unwrap().get(&keys::trigger_next(id));
        let now = Utc::now().timestamp();
        Ok(match raw.and_then(|raw| raw.parse::<i64>().ok()) {
            | Some(ts) if ts > now => ts,
            | _ => 0,
        })
    }

    async fn set_trigger_throttling(
        &self,
        id: &str,
        timestamp: i64,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .set(&keys::trigger_next(id), timestamp.to_string());
        Ok(())
    }

    async fn delete_trigger_throttling(
        &self,
        id: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let mut shelf = self.inner.lock().unwrap();
        shelf.set(&keys::throttling_beginning(id), now.to_string());
        shelf.del(&keys::trigger_next(id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::State;

    fn trigger_on(patterns: &[&str], tags: &[&str]) -> Trigger {
        Trigger {
            name: "test trigger".into(),
            targets: patterns.iter().map(|p| p.to_string()).collect(),
            warn_value: Some(60.0),
            error_value: Some(90.0),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn save_then_get_round_trips_normalized_fields() {
        let store = MemoryStore::new();
        let trigger = trigger_on(&["a.b.c"], &["ops", "db"]);
        store.save_trigger("t1", &trigger, None).await.unwrap();

        let loaded = store.get_trigger("t1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "t1");
        assert_eq!(loaded.warn_value, Some(60.0));
        assert_eq!(loaded.tags, vec!["db".to_string(), "ops".to_string()]);
        assert_eq!(store.get_triggers().await.unwrap(), vec!["t1"]);
        assert_eq!(
            store.get_pattern_triggers("a.b.c").await.unwrap(),
            vec!["t1"]
        );
    }

    #[tokio::test]
    async fn retargeting_cascades_orphaned_pattern() {
        let store = MemoryStore::new();
        let before = trigger_on(&["A.*.M"], &[]);
        store.save_trigger("t1", &before, None).await.unwrap();
        store.send_metric("A.*.M", "A.x.M", 10, 1.0).await.unwrap();

        let after = trigger_on(&["A.*.N"], &[]);
        store
            .save_trigger("t1", &after, Some(&before))
            .await
            .unwrap();

        assert!(!store.has_pattern("A.*.M"));
        assert!(store.has_pattern("A.*.N"));
        assert!(store
            .get_pattern_metrics("A.*.M")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.metric_sample_count("A.x.M"), 0);
    }

    #[tokio::test]
    async fn remove_trigger_cleans_reverse_indices() {
        let store = MemoryStore::new();
        let trigger = trigger_on(&["p.*"], &["ops"]);
        store.save_trigger("t1", &trigger, None).await.unwrap();
        store.send_metric("p.*", "p.one", 10, 1.0).await.unwrap();

        store.remove_trigger("t1", &trigger).await.unwrap();
        assert!(store.get_trigger("t1").await.unwrap().is_none());
        assert!(store.get_triggers().await.unwrap().is_empty());
        assert!(!store.has_pattern("p.*"));
        assert!(store.get_pattern_metrics("p.*").await.unwrap().is_empty());
        assert!(store
            .get_pattern_triggers("p.*")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn check_lock_is_exclusive_until_released() {
        let store = MemoryStore::new();
        assert!(store.set_trigger_check_lock("t1").await.unwrap());
        assert!(!store.set_trigger_check_lock("t1").await.unwrap());
        store.del_trigger_check_lock("t1").await.unwrap();
        assert!(store.set_trigger_check_lock("t1").await.unwrap());
    }

    #[tokio::test]
    async fn lock_acquisition_times_out() {
        let store = MemoryStore::new();
        assert!(store.set_trigger_check_lock("t1").await.unwrap());
        let result = store.acquire_trigger_check_lock("t1", 0).await;
        assert!(matches!(result, Err(StoreError::LockTimeout(_, 0))));
    }

    #[tokio::test]
    async fn pending_queue_has_set_semantics() {
        let store = MemoryStore::new();
        store.add_trigger_check("t1").await.unwrap();
        store.add_trigger_check("t1").await.unwrap();
        assert_eq!(
            store.get_trigger_to_check().await.unwrap(),
            Some("t1".to_string())
        );
        assert_eq!(store.get_trigger_to_check().await.unwrap(), None);
    }

    #[tokio::test]
    async fn last_check_write_updates_rankings() {
        let store = MemoryStore::new();
        let mut check = CheckData::new(State::Ok, 100);
        check.score = Some(0);
        store.set_trigger_last_check("t1", &check).await.unwrap();
        {
            let shelf = store.inner.lock().unwrap();
            assert!(!shelf
                .smembers(keys::TRIGGER_IN_BAD_STATE)
                .contains(&"t1".to_string()));
        }

        check.state = State::Error;
        check.score = Some(check.compute_score());
        store.set_trigger_last_check("t1", &check).await.unwrap();
        let shelf = store.inner.lock().unwrap();
        assert!(shelf
            .smembers(keys::TRIGGER_IN_BAD_STATE)
            .contains(&"t1".to_string()));
        let ranked = shelf.zsets.get(keys::TRIGGERS_CHECKS).unwrap();
        assert_eq!(ranked[0], (100.0, "t1".to_string()));
    }

    #[tokio::test]
    async fn maintenance_patch_is_idempotent() {
        let store = MemoryStore::new();
        let mut check = CheckData::new(State::Ok, 100);
        check
            .metrics
            .insert("m.one".into(), crate::types::MetricState::nodata(100));
        store.set_trigger_last_check("t1", &check).await.unwrap();

        let patch: HashMap<String, i64> =
            [("m.one".to_string(), 500)].into_iter().collect();
        store
            .set_trigger_metrics_maintenance("t1", &patch)
            .await
            .unwrap();
        store
            .set_trigger_metrics_maintenance("t1", &patch)
            .await
            .unwrap();

        let loaded = store
            .get_trigger_last_check("t1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.metrics["m.one"].maintenance, Some(500));
    }

    #[tokio::test]
    async fn event_log_orders_newest_first() {
        let store = MemoryStore::new();
        for (ts, state) in [(10, State::Error), (20, State::Ok)] {
            let event = Event {
                trigger_id: "t1".into(),
                state,
                old_state: State::Nodata,
                timestamp: ts,
                metric: Some("m".into()),
                value: None,
                msg: None,
            };
            store.push_event(&event, true).await.unwrap();
        }
        let (events, total) = store.get_events(Some("t1"), 0, 100).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(events[0].state, State::Ok);
        assert_eq!(events[1].state, State::Error);
    }
}
