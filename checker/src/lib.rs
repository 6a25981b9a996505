pub mod check;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod expression;
pub mod selfmetrics;
pub mod worker;

use std::sync::Arc;

use lib::cache::DedupCache;
use lib::service::ServiceContext;
use lib::store::RedisStore;
use tracing::info;

use crate::check::TriggerCheck;
use crate::selfmetrics::{CheckSpy, GraphiteExporter};

/// Starts the worker pool and blocks until shutdown.
pub async fn start_checker(
    mut context: ServiceContext,
) -> anyhow::Result<()> {
    let config = context.load_config();
    let store = Arc::new(
        RedisStore::connect(&config.redis, config.checker.check_lock_ttl)
            .await?,
    );
    let cache = Arc::new(DedupCache::new());
    let spy = Arc::new(CheckSpy::new());

    if let Some(exporter) = GraphiteExporter::new(&config.graphite, "checker")
    {
        exporter.spawn(spy.clone(), context.shutdown_handle());
    }

    let checker = Arc::new(TriggerCheck::new(
        store.clone(),
        cache,
        config.checker.metrics_ttl,
        &config.checker.bad_states_reminder,
    ));

    let workers = match config.checker.workers {
        | 0 => (num_cpus::get().saturating_sub(1)).max(1),
        | configured => configured,
    };
    info!(workers, "Starting checker worker pool");

    let mut handles = Vec::with_capacity(workers);
    for number in 0..workers {
        handles.push(tokio::spawn(worker::run(
            number,
            checker.clone(),
            store.clone() as Arc<dyn lib::store::Store>,
            spy.clone(),
            context.shutdown_handle(),
        )));
    }

    context.recv_shutdown_signal().await;
    // Workers observe the same signal; wait for in-flight checks to finish.
    for handle in handles {
        let _ = handle.await;
    }
    info!("Checker service terminated");
    Ok(())
}

/// Starts the ingest subscriber and the no-data sweep, blocking until
/// shutdown.
pub async fn start_dispatcher(context: ServiceContext) -> anyhow::Result<()> {
    let config = context.load_config();
    let store = Arc::new(
        RedisStore::connect(&config.redis, config.checker.check_lock_ttl)
            .await?,
    );
    let cache = Arc::new(DedupCache::new());
    let dispatcher = Arc::new(dispatcher::Dispatcher::new(
        store.clone() as Arc<dyn lib::store::Store>,
        cache,
        config.checker.check_interval,
        config.checker.stop_checking_interval,
    ));

    dispatcher::run(
        dispatcher,
        store,
        config.checker.event_channel.clone(),
        config.checker.nodata_check_interval,
        context.shutdown_handle(),
    )
    .await?;
    info!("Dispatcher service terminated");
    Ok(())
}
