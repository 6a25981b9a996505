//! Dispatcher behavior over the in-memory store: ingest fan-out with
//! dedup, orphan pattern garbage collection, and the no-data sweep pause.

use std::sync::Arc;

use checker::dispatcher::Dispatcher;
use chrono::Utc;
use lib::cache::DedupCache;
use lib::store::{MemoryStore, Store};
use lib::types::Trigger;

fn dispatcher(store: Arc<MemoryStore>) -> Dispatcher {
    Dispatcher::new(store, Arc::new(DedupCache::new()), 5, 30)
}

async fn save_trigger(store: &MemoryStore, id: &str, pattern: &str) {
    let trigger = Trigger {
        name: "test trigger".into(),
        targets: vec![pattern.to_string()],
        warn_value: Some(60.0),
        error_value: Some(90.0),
        patterns: vec![pattern.to_string()],
        ..Default::default()
    };
    store.save_trigger(id, &trigger, None).await.unwrap();
}

#[tokio::test]
async fn metric_event_enqueues_subscribed_triggers() {
    let store = Arc::new(MemoryStore::new());
    save_trigger(&store, "t1", "servers.*.cpu").await;
    let dispatcher = dispatcher(store.clone());

    dispatcher
        .handle_message(
            r#"{"pattern": "servers.*.cpu", "metric": "servers.web.cpu"}"#,
        )
        .await
        .unwrap();

    assert_eq!(
        store.get_pattern_metrics("servers.*.cpu").await.unwrap(),
        vec!["servers.web.cpu"]
    );
    assert_eq!(
        store.get_trigger_to_check().await.unwrap(),
        Some("t1".to_string())
    );
    assert_eq!(store.get_trigger_to_check().await.unwrap(), None);
}

#[tokio::test]
async fn repeated_events_dedup_within_check_interval() {
    let store = Arc::new(MemoryStore::new());
    save_trigger(&store, "t1", "servers.*.cpu").await;
    let dispatcher = dispatcher(store.clone());

    for _ in 0..3 {
        dispatcher
            .handle_message(
                r#"{"pattern": "servers.*.cpu", "metric": "servers.web.cpu"}"#,
            )
            .await
            .unwrap();
    }

    assert!(store.get_trigger_to_check().await.unwrap().is_some());
    assert_eq!(store.get_trigger_to_check().await.unwrap(), None);
}

#[tokio::test]
async fn orphan_pattern_is_garbage_collected() {
    let store = Arc::new(MemoryStore::new());
    let dispatcher = dispatcher(store.clone());
    store
        .send_metric("ghost.*", "ghost.one", 100, 1.0)
        .await
        .unwrap();

    dispatcher
        .handle_message(r#"{"pattern": "ghost.*", "metric": "ghost.one"}"#)
        .await
        .unwrap();

    assert!(!store.has_pattern("ghost.*"));
    assert!(store.get_pattern_metrics("ghost.*").await.unwrap().is_empty());
    assert_eq!(store.metric_sample_count("ghost.one"), 0);
    assert_eq!(store.get_trigger_to_check().await.unwrap(), None);
}

#[tokio::test]
async fn malformed_messages_are_dropped() {
    let store = Arc::new(MemoryStore::new());
    let dispatcher = dispatcher(store.clone());

    dispatcher.handle_message("not json at all").await.unwrap();
    dispatcher
        .handle_message(r#"{"pattern": "p"}"#)
        .await
        .unwrap();

    assert_eq!(store.get_trigger_to_check().await.unwrap(), None);
}

#[tokio::test]
async fn nodata_sweep_enqueues_every_trigger() {
    let store = Arc::new(MemoryStore::new());
    save_trigger(&store, "t1", "a.b").await;
    save_trigger(&store, "t2", "c.d").await;
    let dispatcher = dispatcher(store.clone());
    dispatcher.mark_data_received(Utc::now().timestamp());

    dispatcher.check_nodata().await.unwrap();

    let mut pending = Vec::new();
    while let Some(id) = store.get_trigger_to_check().await.unwrap() {
        pending.push(id);
    }
    pending.sort();
    assert_eq!(pending, vec!["t1".to_string(), "t2".to_string()]);
}

#[tokio::test]
async fn nodata_sweep_pauses_when_ingestion_is_silent() {
    let store = Arc::new(MemoryStore::new());
    save_trigger(&store, "t1", "a.b").await;
    let dispatcher = dispatcher(store.clone());
    dispatcher.mark_data_received(Utc::now().timestamp() - 3600);

    dispatcher.check_nodata().await.unwrap();
    assert_eq!(store.get_trigger_to_check().await.unwrap(), None);
}
