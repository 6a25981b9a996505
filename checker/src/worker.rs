use std::sync::Arc;
use std::time::Instant;

use lib::prelude::*;
use lib::shutdown::Shutdown;
use lib::store::Store;
use metrics::{counter, histogram};
use rand::Rng;
use tracing::{error, info};

/// One checker worker: drain the pending set, guard each trigger with its
/// check lock, and time every check into the spy. Shutdown is honored
/// between triggers; an in-flight check always runs to completion.
pub async fn run(
    number: usize,
    checker: Arc<crate::check::TriggerCheck>,
    store: Arc<dyn Store>,
    spy: Arc<crate::selfmetrics::CheckSpy>,
    mut shutdown: Shutdown,
) {
    info!(worker = number, "Checker worker started");
    loop {
        let popped = tokio::select! {
            _ = shutdown.recv() => break,
            popped = store.get_trigger_to_check() => popped,
        };
        match popped {
            | Ok(Some(trigger_id)) => {
                if let Err(error) =
                    check_one(&checker, store.as_ref(), &spy, &trigger_id)
                        .await
                {
                    spy.report_error();
                    counter!("checker.trigger_check_errors_total", 1);
                    error!(trigger_id, %error, "Trigger check failed");
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(ERROR_TIMEOUT) => {}
                    }
                }
            }
            | Ok(None) => {
                // Idle; a randomized nap spreads the workers out.
                let nap = rand::thread_rng().gen_range(
                    PERFORM_INTERVAL.mul_f64(10.0)
                        ..PERFORM_INTERVAL.mul_f64(20.0),
                );
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(nap) => {}
                }
            }
            | Err(error) => {
                spy.report_error();
                counter!("checker.trigger_check_errors_total", 1);
                error!(%error, "Could not pop a trigger to check");
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(ERROR_TIMEOUT) => {}
                }
            }
        }
    }
    info!(worker = number, "Checker worker stopped");
}

async fn check_one(
    checker: &crate::check::TriggerCheck,
    store: &dyn Store,
    spy: &crate::selfmetrics::CheckSpy,
    trigger_id: &str,
) -> anyhow::Result<()> {
    // Another worker holding the lock is already on it.
    if !store.set_trigger_check_lock(trigger_id).await? {
        return Ok(());
    }
    let started = Instant::now();
    let result = checker.check(trigger_id, None, None, 60).await;
    store.del_trigger_check_lock(trigger_id).await?;
    result?;

    let elapsed = started.elapsed();
    spy.report_check(elapsed);
    histogram!("checker.trigger_check_seconds", elapsed.as_secs_f64());
    counter!("checker.triggers_checked_total", 1);
    Ok(())
}
