use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use fred::prelude::*;
use tracing::debug;

use super::keys;
use super::{Store, StoreError};
use crate::config::RedisConfig as RedisSettings;
use crate::prelude::*;
use crate::types::{CheckData, Event, TagData, Trigger};

const MAINTENANCE_SWAP_ATTEMPTS: u32 = 10;

/// Redis-backed store. One client is shared by every worker; fred pipelines
/// concurrent commands over the single connection.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    check_lock_ttl: i64,
}

impl RedisStore {
    pub async fn connect(
        settings: &RedisSettings,
        check_lock_ttl: i64,
    ) -> Result<RedisStore, StoreError> {
        let config = Config::from_url(&settings.url())?;
        let client = Client::new(config, None, None, None);
        client.connect();
        client.wait_for_connect().await?;
        debug!(
            host = settings.host,
            port = settings.port,
            "Connected to redis"
        );
        Ok(RedisStore {
            client,
            check_lock_ttl,
        })
    }

    /// A second connection for pub/sub; subscriber connections cannot issue
    /// regular commands.
    pub fn subscriber(&self) -> Client {
        self.client.clone_new()
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get_trigger(
        &self,
        id: &str,
    ) -> Result<Option<Trigger>, StoreError> {
        let json: Option<String> =
            self.client.get(keys::trigger(id)).await?;
        let Some(json) = json else {
            return Ok(None);
        };
        let tags: Vec<String> =
            self.client.smembers(keys::trigger_tags(id)).await?;
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
        let mut cleanup_patterns: Vec<&str> = Vec::new();

        let trx = self.client.multi();
        if let Some(existing) = existing {
            for pattern in existing
                .patterns
                .iter()
                .filter(|p| !trigger.patterns.contains(p))
            {
                let _: () = trx
                    .srem(keys::pattern_triggers(pattern), id)
                    .await?;
                cleanup_patterns.push(pattern);
            }
            for tag in existing
                .tags
                .iter()
                .filter(|t| !trigger.tags.contains(t))
            {
                let _: () =
                    trx.srem(keys::trigger_tags(id), tag.as_str()).await?;
                let _: () = trx.srem(keys::tag_triggers(tag), id).await?;
            }
        }
        let _: () = trx.set(keys::trigger(id), json, None, None, false).await?;
        let _: () = trx.sadd(keys::TRIGGERS, id).await?;
        for pattern in &trigger.patterns {
            let _: () = trx.sadd(keys::PATTERNS, pattern.as_str()).await?;
            let _: () = trx.sadd(keys::pattern_triggers(pattern), id).await?;
        }
        for tag in &trigger.tags {
            let _: () =
                trx.sadd(keys::trigger_tags(id), tag.as_str()).await?;
            let _: () = trx.sadd(keys::tag_triggers(tag), id).await?;
            let _: () = trx.sadd(keys::TAGS, tag.as_str()).await?;
        }
        let _: () = trx.exec(true).await?;

        for pattern in cleanup_patterns {
            let subscribers = self.get_pattern_triggers(pattern).await?;
            if subscribers.is_empty() {
                self.remove_pattern_triggers(pattern).await?;
                self.remove_pattern(pattern).await?;
                for metric in self.get_pattern_metrics(pattern).await? {
                    self.del_metric(&metric).await?;
                }
                self.del_pattern_metrics(pattern).await?;
            }
        }
        Ok(())
    }

    async fn remove_trigger(
        &self,
        id: &str,
        existing: &Trigger,
    ) -> Result<(), StoreError> {
        let trx = self.client.multi();
        let _: () = trx.del(keys::trigger(id)).await?;
        let _: () = trx.del(keys::trigger_tags(id)).await?;
        let _: () = trx.srem(keys::TRIGGERS, id).await?;
        for tag in &existing.tags {
            let _: () = trx.srem(keys::tag_triggers(tag), id).await?;
        }
        for pattern in &existing.patterns {
            let _: () =
                trx.srem(keys::pattern_triggers(pattern), id).await?;
        }
        let _: () = trx.exec(true).await?;

        for pattern in &existing.patterns {
            let subscribers: u64 = self
                .client
                .scard(keys::pattern_triggers(pattern))
                .await?;
            if subscribers == 0 {
                self.remove_pattern(pattern).await?;
                for metric in self.get_pattern_metrics(pattern).await? {
                    self.del_metric(&metric).await?;
                }
                self.del_pattern_metrics(pattern).await?;
            }
        }
        Ok(())
    }

    async fn get_triggers(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.client.smembers(keys::TRIGGERS).await?)
    }

    async fn get_patterns(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.client.smembers(keys::PATTERNS).await?)
    }

    async fn add_pattern_metric(
        &self,
        pattern: &str,
        metric: &str,
    ) -> Result<(), StoreError> {
        let _: () = self
            .client
            .sadd(keys::pattern_metrics(pattern), metric)
            .await?;
        Ok(())
    }

    async fn get_pattern_metrics(
        &self,
        pattern: &str,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .client
            .smembers(keys::pattern_metrics(pattern))
            .await?)
    }

    async fn del_pattern_metrics(
        &self,
        pattern: &str,
    ) -> Result<(), StoreError> {
        let _: () = self.client.del(keys::pattern_metrics(pattern)).await?;
        Ok(())
    }

    async fn get_pattern_triggers(
        &self,
        pattern: &str,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .client
            .smembers(keys::pattern_triggers(pattern))
            .await?)
    }

    async fn remove_pattern(&self, pattern: &str) -> Result<(), StoreError> {
        let _: () = self.client.srem(keys::PATTERNS, pattern).await?;
        Ok(())
    }

    async fn remove_pattern_triggers(
        &self,
        pattern: &str,
    ) -> Result<(), StoreError> {
        let _: () = self.client.del(keys::pattern_triggers(pattern)).await?;
        Ok(())
    }

    async fn get_metrics_values(
        &self,
        metrics: &[String],
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<Vec<(String, i64)>>, StoreError> {
        let mut results = Vec::with_capacity(metrics.len());
        for metric in metrics {
            let raw: Vec<(String, f64)> = self
                .client
                .zrangebyscore(
                    keys::metric_data(metric),
                    from_ts as f64,
                    to_ts as f64,
                    true,
                    None,
                )
                .await?;
            results.push(
                raw.into_iter().map(|(m, ts)| (m, ts as i64)).collect(),
            );
        }
        Ok(results)
    }

    async fn cleanup_metric_values(
        &self,
        metric: &str,
        older_than: i64,
    ) -> Result<(), StoreError> {
        let _: () = self
            .client
            .zremrangebyscore(
                keys::metric_data(metric),
                "-inf",
                older_than as f64,
            )
            .await?;
        Ok(())
    }

    async fn del_metric(&self, metric: &str) -> Result<(), StoreError> {
        let _: () = self.client.del(keys::metric_data(metric)).await?;
        Ok(())
    }

    async fn get_metric_retention(
        &self,
        metric: &str,
    ) -> Result<i64, StoreError> {
        let raw: Option<i64> =
            self.client.get(keys::metric_retention(metric)).await?;
        Ok(raw.unwrap_or(60))
    }

    async fn send_metric(
        &self,
        pattern: &str,
        metric: &str,
        timestamp: i64,
        value: f64,
    ) -> Result<(), StoreError> {
        let member = format!("{timestamp} {value}");
        let _: () = self
            .client
            .zadd(
                keys::metric_data(metric),
                None,
                None,
                false,
                false,
                (timestamp as f64, member.as_str()),
            )
            .await?;
        self.add_pattern_metric(pattern, metric).await
    }

    async fn get_tag(&self, tag: &str) -> Result<TagData, StoreError> {
        let json: Option<String> = self.client.get(keys::tag(tag)).await?;
        match json {
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
        let _: () =
            self.client.set(keys::tag(tag), json, None, None, false).await?;
        Ok(())
    }

    async fn get_trigger_last_check(
        &self,
        id: &str,
    ) -> Result<Option<CheckData>, StoreError> {
        let json: Option<String> =
            self.client.get(keys::last_check(id)).await?;
        match json {
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

        let trx = self.client.multi();
        let _: () =
            trx.set(keys::last_check(id), json, None, None, false).await?;
        let _: () = trx
            .zadd(
                keys::TRIGGERS_CHECKS,
                None,
                None,
                false,
                false,
                (score as f64, id),
            )
            .await?;
        let _: () = trx.incr(keys::CHECKS_COUNTER).await?;
        if score > 0 {
            let _: () = trx.sadd(keys::TRIGGER_IN_BAD_STATE, id).await?;
        } else {
            let _: () = trx.srem(keys::TRIGGER_IN_BAD_STATE, id).await?;
        }
        let _: () = trx.exec(true).await?;
        Ok(())
    }

    async fn remove_trigger_last_check(
        &self,
        id: &str,
    ) -> Result<(), StoreError> {
        let _: () = self.client.del(keys::last_check(id)).await?;
        Ok(())
    }

    async fn set_trigger_check_lock(
        &self,
        id: &str,
    ) -> Result<bool, StoreError> {
        let acquired: Option<String> = self
            .client
            .set(
                keys::check_lock(id),
                Utc::now().timestamp(),
                Some(Expiration::EX(self.check_lock_ttl)),
                Some(SetOptions::NX),
                false,
            )
            .await?;
        Ok(acquired.is_some())
    }

    async fn acquire_trigger_check_lock(
        &self,
        id: &str,
        timeout_secs: u64,
    ) -> Result<(), StoreError> {
        let deadline = Instant::now()
            + std::time::Duration::from_secs(timeout_secs);
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
        let _: () = self.client.del(keys::check_lock(id)).await?;
        Ok(())
    }

    async fn add_trigger_check(&self, id: &str) -> Result<(), StoreError> {
        let _: () = self.client.sadd(keys::TRIGGERS_TO_CHECK, id).await?;
        Ok(())
    }

    async fn get_trigger_to_check(
        &self,
    ) -> Result<Option<String>, StoreError> {
        Ok(self.client.spop(keys::TRIGGERS_TO_CHECK, None).await?)
    }

    async fn push_event(
        &self,
        event: &Event,
        ui: bool,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(event)?;
        let horizon = Utc::now().timestamp() - TRIGGER_EVENTS_TTL;

        let trx = self.client.multi();
        let _: () = trx.lpush(keys::EVENTS, json.as_str()).await?;
        let trigger_events = keys::trigger_events(&event.trigger_id);
        let _: () = trx
            .zadd(
                trigger_events.as_str(),
                None,
                None,
                false,
                false,
                (event.timestamp as f64, json.as_str()),
            )
            .await?;
        let _: () = trx
            .zremrangebyscore(
                trigger_events.as_str(),
                "-inf",
                horizon as f64,
            )
            .await?;
        if ui {
            let _: () = trx.lpush(keys::EVENTS_UI, json.as_str()).await?;
            let _: () = trx.ltrim(keys::EVENTS_UI, 0, 100).await?;
        }
        let _: () = trx.exec(true).await?;
        Ok(())
    }

    async fn get_events(
        &self,
        trigger_id: Option<&str>,
        start: i64,
        size: i64,
    ) -> Result<(Vec<Event>, usize), StoreError> {
        let (raw, total): (Vec<String>, usize) = match trigger_id {
            | None => {
                let raw: Vec<String> =
                    self.client.lrange(keys::EVENTS_UI, 0, -1).await?;
                let total = raw.len();
                (raw, total)
            }
            | Some(id) => {
                let key = keys::trigger_events(id);
                let raw: Vec<String> = self
                    .client
                    .zrevrange(key.as_str(), start, start + size, false)
                    .await?;
                let total: usize = self.client.zcard(key.as_str()).await?;
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
        let key = keys::last_check(id);
        let mut current: Option<String> = self.client.get(key.as_str()).await?;
        for _ in 0..MAINTENANCE_SWAP_ATTEMPTS {
            let Some(json) = current else {
                return Ok(());
            };
            let mut check: CheckData = serde_json::from_str(&json)?;
            for (metric, until) in metrics {
                if let Some(state) = check.metrics.get_mut(metric) {
                    state.maintenance = Some(*until);
                }
            }
            let updated = serde_json::to_string(&check)?;
            let previous: Option<String> =
                self.client.getset(key.as_str(), updated).await?;
            if previous.as_deref() == Some(json.as_str()) {
                return Ok(());
            }
            current = previous;
        }
        Err(StoreError::SwapExhausted(
            id.to_string(),
            MAINTENANCE_SWAP_ATTEMPTS,
        ))
    }

    async fn get_trigger_throttling(
        &self,
        id: &str,
    ) -> Result<i64, StoreError> {
        let raw: Option<i64> =
            self.client.get(keys::trigger_next(id)).await?;
        let now = Utc::now().timestamp();
        Ok(match raw {
            | Some(ts) if ts > now => ts,
            | _ => 0,
        })
    }

    async fn set_trigger_throttling(
        &self,
        id: &str,
        timestamp: i64,
    ) -> Result<(), StoreError> {
        let _: () = self
            .client
            .set(keys::trigger_next(id), timestamp, None, None, false)
            .await?;
        Ok(())
    }

    async fn delete_trigger_throttling(
        &self,
        id: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let _: () = self
            .client
            .set(keys::throttling_beginning(id), now, None, None, false)
            .await?;
        let _: () = self.client.del(keys::trigger_next(id)).await?;
        Ok(())
    }
}
