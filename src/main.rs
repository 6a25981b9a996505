mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use lib::cache::DedupCache;
use lib::config::{ConfigLoader, Role};
use lib::service::ServiceContext;
use lib::shutdown::Shutdown;
use lib::store::RedisStore;
use tokio::task::JoinSet;
use tokio::{select, time};
use tracing::{error, info, trace, warn, Subscriber};
use tracing_subscriber::FmtSubscriber;

fn setup_logging_subscriber(
    f: &cli::LogFormat,
) -> Box<dyn Subscriber + Send + Sync> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            "vigild=debug,checker=debug,lib=debug,graphite=info".into()
        });

    let sub = FmtSubscriber::builder()
        .with_thread_names(true)
        .with_env_filter(env_filter);

    match f {
        | cli::LogFormat::Pretty => Box::new(sub.pretty().finish()),
        | cli::LogFormat::Compact => Box::new(sub.compact().finish()),
        | cli::LogFormat::Json => Box::new(sub.json().finish()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = cli::CliOpts::parse();
    let mut shutdown = Shutdown::default();

    tracing::subscriber::set_global_default(setup_logging_subscriber(
        &opts.log_format,
    ))?;

    trace!(config = opts.config, "Loading configuration");
    let config_loader = Arc::new(ConfigLoader::from_path(&opts.config));
    let config = config_loader.load()?;

    // One-shot mode: check a single trigger and exit.
    if let Some(trigger_id) = opts.trigger {
        return check_single_trigger(&config, &trigger_id).await;
    }

    let mut services = JoinSet::new();
    for ref role in config.main.roles {
        services.spawn(spawn_service(
            role.clone(),
            config_loader.clone(),
            shutdown.clone(),
        ));
    }
    if services.is_empty() {
        bail!("No roles configured, nothing to run");
    }

    select! {
        _ = shutdown.recv() => {
            warn!("Received shutdown signal from downstream services!");
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Received Ctrl+c signal (SIGINT)!");
            shutdown.broadcast_shutdown();
        }
    };

    // Give services 10 seconds to cleanly shutdown after the signal.
    info!("Waiting (10s) for services to shutdown cleanly...");
    if (time::timeout(Duration::from_secs(10), async {
        while services.join_next().await.is_some() {
            info!("Need to wait for {} services to terminate", services.len());
        }
    })
    .await)
        .is_err()
    {
        error!(
            "Timed out awaiting {} services to shutdown!",
            services.len()
        );
        services.shutdown().await;
        bail!("Some services were not terminated cleanly!");
    }
    info!("Bye!");

    Ok(())
}

async fn spawn_service(
    role: Role,
    config_loader: Arc<ConfigLoader>,
    mut shutdown: Shutdown,
) {
    let context =
        ServiceContext::for_role(role.clone(), config_loader, shutdown.clone());
    let service_name = context.service_name();
    info!(service = service_name, "Starting service '{service_name}'");

    let join_handle = match role {
        | Role::Checker => tokio::spawn(checker::start_checker(context)),
        | Role::Dispatcher => {
            tokio::spawn(checker::start_dispatcher(context))
        }
    };
    match join_handle.await.unwrap() {
        | Ok(_) => info!("Service '{service_name}' terminated!"),
        | Err(e) => {
            error!("Failed to start '{service_name}': {e}");
            shutdown.broadcast_shutdown();
        }
    }
}

async fn check_single_trigger(
    config: &lib::config::Config,
    trigger_id: &str,
) -> Result<()> {
    let store = Arc::new(
        RedisStore::connect(&config.redis, config.checker.check_lock_ttl)
            .await?,
    );
    let checker = checker::check::TriggerCheck::new(
        store,
        Arc::new(DedupCache::new()),
        config.checker.metrics_ttl,
        &config.checker.bad_states_reminder,
    );
    checker.check(trigger_id, None, None, 60).await?;
    info!(trigger_id, "Check complete");
    Ok(())
}
