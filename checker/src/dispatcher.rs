//! Ingest dispatcher: subscribes to the metric-event channel, maintains the
//! pattern -> metrics index, enqueues affected triggers, and sweeps every
//! trigger for no-data detection while ingestion is healthy.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fred::interfaces::{ClientLike, EventInterface, PubsubInterface};
use lib::cache::DedupCache;
use lib::store::{RedisStore, Store, StoreError};
use lib::shutdown::Shutdown;
use metrics::counter;
use serde::Deserialize;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
struct MetricEvent {
    pattern: String,
    metric: String,
}

/// Shared dispatcher state; the ingest loop and the no-data sweep hang off
/// the same instance.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    cache: Arc<DedupCache>,
    check_interval: u64,
    stop_checking_interval: i64,
    last_data: AtomicI64,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<DedupCache>,
        check_interval: u64,
        stop_checking_interval: i64,
    ) -> Dispatcher {
        Dispatcher {
            store,
            cache,
            check_interval,
            stop_checking_interval,
            last_data: AtomicI64::new(Utc::now().timestamp()),
        }
    }

    /// One inbound `{"pattern": ..., "metric": ...}` message. A pattern
    /// with no subscribed triggers is garbage collected together with its
    /// metrics; otherwise each subscriber is enqueued, deduplicated over
    /// the check interval.
    pub async fn handle_message(
        &self,
        payload: &str,
    ) -> Result<(), StoreError> {
        let event: MetricEvent = match serde_json::from_str(payload) {
            | Ok(event) => event,
            | Err(error) => {
                warn!(%error, payload, "Dropping malformed metric event");
                counter!("dispatcher.malformed_events_total", 1);
                return Ok(());
            }
        };
        self.last_data
            .store(Utc::now().timestamp(), Ordering::Relaxed);

        self.store
            .add_pattern_metric(&event.pattern, &event.metric)
            .await?;
        let triggers =
            self.store.get_pattern_triggers(&event.pattern).await?;
        if triggers.is_empty() {
            info!(
                pattern = event.pattern,
                "Pattern has no triggers, cleaning up"
            );
            self.store.remove_pattern(&event.pattern).await?;
            for metric in
                self.store.get_pattern_metrics(&event.pattern).await?
            {
                self.store.del_metric(&metric).await?;
            }
            self.store.del_pattern_metrics(&event.pattern).await?;
            return Ok(());
        }

        for trigger_id in triggers {
            if self.cache.fresh(
                "add_trigger_check",
                &trigger_id,
                Duration::from_secs(self.check_interval),
            ) {
                self.store.add_trigger_check(&trigger_id).await?;
            }
        }
        Ok(())
    }

    /// Enqueues every known trigger so silent metrics are noticed. Skipped
    /// while ingestion itself is down: a quiet upstream must not turn into
    /// a NODATA storm.
    pub async fn check_nodata(&self) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let last_data = self.last_data.load(Ordering::Relaxed);
        if last_data + self.stop_checking_interval < now {
            info!(
                silent_for = now - last_data,
                "Nodata sweep disabled, no metrics arriving"
            );
            return Ok(());
        }
        info!("Checking nodata");
        for trigger_id in self.store.get_triggers().await? {
            if self.cache.fresh(
                "add_trigger_check",
                &trigger_id,
                Duration::from_secs(60),
            ) {
                self.store.add_trigger_check(&trigger_id).await?;
            }
        }
        Ok(())
    }

    pub fn mark_data_received(&self, timestamp: i64) {
        self.last_data.store(timestamp, Ordering::Relaxed);
    }
}

/// Runs the subscriber and the periodic sweep until shutdown.
pub async fn run(
    dispatcher: Arc<Dispatcher>,
    store: Arc<RedisStore>,
    channel: String,
    nodata_check_interval: u64,
    mut shutdown: Shutdown,
) -> anyhow::Result<()> {
    let subscriber = store.subscriber();
    subscriber.connect();
    subscriber.wait_for_connect().await?;
    let mut messages = subscriber.message_rx();
    subscriber.subscribe(channel.as_str()).await?;
    info!(channel, "Subscribed to metric events");

    let mut sweep =
        tokio::time::interval(Duration::from_secs(nodata_check_interval.max(1)));
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = sweep.tick() => {
                if let Err(error) = dispatcher.check_nodata().await {
                    error!(%error, "Nodata sweep failed");
                }
            }
            message = messages.recv() => {
                let Ok(message) = message else {
                    continue;
                };
                let Some(payload) = message.value.as_bytes() else {
                    continue;
                };
                match String::from_utf8(payload.to_vec()) {
                    | Ok(payload) => {
                        if let Err(error) =
                            dispatcher.handle_message(&payload).await
                        {
                            error!(%error, "Metric event handling failed");
                        }
                    }
                    | Err(error) => {
                        warn!(%error, "Metric event is not valid UTF-8");
                    }
                }
            }
        }
    }
    let _ = subscriber.quit().await;
    Ok(())
}
