//! Evaluator behavior against the in-memory store: pattern resolution,
//! stub series, bootstrapped window functions, and template substitution.

use std::sync::Arc;

use graphite::{evaluate_target, RequestContext};
use lib::store::{MemoryStore, Store};

const NOW: i64 = 1_500_000_000;

async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    // Ten one-minute samples, oldest first: 0..9.
    for n in 0..10i64 {
        store
            .send_metric("m", "m", NOW - 60 * (10 - n), n as f64)
            .await
            .unwrap();
    }
    store
}

#[tokio::test]
async fn plain_path_resolves_pattern_metrics() {
    let store = Arc::new(MemoryStore::new());
    store
        .send_metric("host.*.cpu", "host.a.cpu", NOW - 60, 1.0)
        .await
        .unwrap();
    store
        .send_metric("host.*.cpu", "host.b.cpu", NOW - 60, 2.0)
        .await
        .unwrap();

    let mut ctx = RequestContext::new(store, NOW - 600, NOW);
    let series = evaluate_target(&mut ctx, "host.*.cpu").await.unwrap();
    assert_eq!(series.len(), 2);
    assert_eq!(series[0].name, "host.a.cpu");
    assert_eq!(series[0].path_expression, "host.*.cpu");
    assert!(ctx.graphite_patterns.contains_key("host.*.cpu"));
    assert!(ctx.metrics.contains("host.a.cpu"));
    assert!(ctx.metrics.contains("host.b.cpu"));
}

#[tokio::test]
async fn unmatched_pattern_yields_a_stub() {
    let store = Arc::new(MemoryStore::new());
    let mut ctx = RequestContext::new(store, NOW - 600, NOW);
    let series = evaluate_target(&mut ctx, "no.such.metric").await.unwrap();
    assert_eq!(series.len(), 1);
    assert!(series[0].stub);
    assert_eq!(series[0].name, "no.such.metric");
    assert!(series[0].values.is_empty());
    // The pattern is still recorded so save-side pattern derivation works.
    assert!(ctx.graphite_patterns.contains_key("no.such.metric"));
}

#[tokio::test]
async fn moving_average_bootstraps_past_the_window_start() {
    for realtime in [false, true] {
        let store = seeded_store().await;
        let mut ctx = RequestContext::new(store, NOW - 180, NOW - 60)
            .with_real_time(realtime);
        let series = evaluate_target(&mut ctx, "movingAverage(m, 2)")
            .await
            .unwrap();
        assert_eq!(series.len(), 1);
        // The first windowed point averages the value in the bucket just
        // before the range with the first in-range value.
        assert_eq!(series[0].values[0], Some(6.5));
        assert_eq!(series[0].name, "movingAverage(m,2)");
    }
}

#[tokio::test]
async fn nested_call_pipeline_keeps_values() {
    let store = seeded_store().await;
    let mut ctx = RequestContext::new(store, NOW - 300, NOW);
    let series =
        evaluate_target(&mut ctx, "scale(transformNull(m, 0), 10)")
            .await
            .unwrap();
    assert_eq!(series.len(), 1);
    assert!(series[0]
        .values
        .iter()
        .all(|v| v.is_some()));
    assert_eq!(series[0].values[0], Some(50.0));
}

#[tokio::test]
async fn template_substitutes_variables() {
    let store = Arc::new(MemoryStore::new());
    store
        .send_metric("hosts.web01.cpu", "hosts.web01.cpu", NOW - 60, 3.0)
        .await
        .unwrap();
    let mut ctx = RequestContext::new(store, NOW - 600, NOW);
    let series = evaluate_target(
        &mut ctx,
        "template(hosts.$host.cpu, host='web01')",
    )
    .await
    .unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].name, "hosts.web01.cpu");
}

#[tokio::test]
async fn unknown_function_is_an_error() {
    let store = Arc::new(MemoryStore::new());
    let mut ctx = RequestContext::new(store, NOW - 600, NOW);
    assert!(evaluate_target(&mut ctx, "definitelyNotAFunction(m)")
        .await
        .is_err());
}

#[tokio::test]
async fn group_combines_series_lists() {
    let store = Arc::new(MemoryStore::new());
    store.send_metric("a", "a", NOW - 60, 1.0).await.unwrap();
    store.send_metric("b", "b", NOW - 60, 2.0).await.unwrap();
    let mut ctx = RequestContext::new(store, NOW - 600, NOW);
    let series = evaluate_target(&mut ctx, "group(a, b)").await.unwrap();
    let names: Vec<&str> =
        series.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
}
