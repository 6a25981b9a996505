//! Checker self-metrics: rolling (sum, count) windows for check timing and
//! errors, flushed to Graphite over the plaintext protocol with round-robin
//! failover between replicas.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use lib::config::GraphiteConfig;
use lib::shutdown::Shutdown;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

const BATCH_WINDOW: Duration = Duration::from_secs(10);
const REPORT_WINDOW: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Windows {
    checks: VecDeque<Batch>,
    errors: VecDeque<Batch>,
}

struct Batch {
    at: Instant,
    sum: f64,
    count: u64,
}

/// Rolling counters over the last minute, batched in ten second slices.
#[derive(Default)]
pub struct CheckSpy {
    windows: Mutex<Windows>,
}

fn report(batches: &mut VecDeque<Batch>, size: f64) {
    let now = Instant::now();
    while let Some(first) = batches.front() {
        if now.duration_since(first.at) > REPORT_WINDOW {
            batches.pop_front();
        } else {
            break;
        }
    }
    if let Some(last) = batches.back_mut() {
        if now.duration_since(last.at) < BATCH_WINDOW {
            last.sum += size;
            last.count += 1;
            return;
        }
    }
    batches.push_back(Batch {
        at: now,
        sum: size,
        count: 1,
    });
}

fn totals(batches: &VecDeque<Batch>) -> (f64, u64) {
    let now = Instant::now();
    batches
        .iter()
        .filter(|batch| now.duration_since(batch.at) <= REPORT_WINDOW)
        .fold((0.0, 0), |(sum, count), batch| {
            (sum + batch.sum, count + batch.count)
        })
}

impl CheckSpy {
    pub fn new() -> CheckSpy {
        CheckSpy::default()
    }

    pub fn report_check(&self, elapsed: Duration) {
        report(
            &mut self.windows.lock().unwrap().checks,
            elapsed.as_secs_f64(),
        );
    }

    pub fn report_error(&self) {
        report(&mut self.windows.lock().unwrap().errors, 0.0);
    }

    /// `(time_sum, check_count, error_count)` over the report window.
    pub fn snapshot(&self) -> (f64, u64, u64) {
        let windows = self.windows.lock().unwrap();
        let (time_sum, check_count) = totals(&windows.checks);
        let (_, error_count) = totals(&windows.errors);
        (time_sum, check_count, error_count)
    }
}

/// One Graphite replica with its (re)connect state.
struct Replica {
    address: String,
    connection: Option<TcpStream>,
    last_attempt: Option<Instant>,
}

impl Replica {
    async fn send(&mut self, payload: &str) -> bool {
        if self.connection.is_none() {
            if let Some(last) = self.last_attempt {
                if last.elapsed() < RECONNECT_DELAY {
                    return false;
                }
            }
            self.last_attempt = Some(Instant::now());
            match TcpStream::connect(&self.address).await {
                | Ok(stream) => {
                    info!(replica = self.address, "Connected to graphite");
                    self.connection = Some(stream);
                }
                | Err(error) => {
                    warn!(
                        replica = self.address,
                        %error,
                        "Graphite connect failed"
                    );
                    return false;
                }
            }
        }
        let stream = self.connection.as_mut().unwrap();
        if let Err(error) = stream.write_all(payload.as_bytes()).await {
            warn!(replica = self.address, %error, "Graphite send failed");
            self.connection = None;
            return false;
        }
        true
    }
}

/// Periodically renders the spy snapshot as plaintext metric lines and
/// sends it to one connected replica at a time, rotating on every flush
/// and failing over when the current replica is down.
pub struct GraphiteExporter {
    replicas: Vec<Replica>,
    prefix: String,
    interval: Duration,
    hostname: String,
    worker_label: String,
    index: usize,
}

impl GraphiteExporter {
    pub fn new(config: &GraphiteConfig, worker_label: &str) -> Option<Self> {
        if config.uris.is_empty() {
            return None;
        }
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        let hostname = hostname
            .split('.')
            .next()
            .unwrap_or("unknown")
            .to_string();
        Some(GraphiteExporter {
            replicas: config
                .uris
                .iter()
                .map(|address| Replica {
                    address: address.clone(),
                    connection: None,
                    last_attempt: None,
                })
                .collect(),
            prefix: config.prefix.clone(),
            interval: Duration::from_secs(config.interval.max(1)),
            hostname,
            worker_label: worker_label.to_string(),
            index: 0,
        })
    }

    fn render(&self, spy: &CheckSpy) -> String {
        let (time_sum, check_count, error_count) = spy.snapshot();
        let timestamp = Utc::now().timestamp();
        let scope = format!("{}.{}", self.hostname, self.worker_label);
        format!(
            "{prefix}.checker.time.{scope} {time_sum} {timestamp}\n\
             {prefix}.checker.triggers.{scope} {check_count} {timestamp}\n\
             {prefix}.checker.errors.{scope} {error_count} {timestamp}\n",
            prefix = self.prefix,
        )
    }

    async fn flush(&mut self, spy: &CheckSpy) {
        let payload = self.render(spy);
        let total = self.replicas.len();
        for _ in 0..total {
            let replica = &mut self.replicas[self.index];
            let sent = replica.send(&payload).await;
            self.index = (self.index + 1) % total;
            if sent {
                debug!("Sent self-metrics to graphite");
                return;
            }
        }
        warn!("No graphite connection");
    }

    pub fn spawn(
        mut self,
        spy: std::sync::Arc<CheckSpy>,
        mut shutdown: Shutdown,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(
                tokio::time::MissedTickBehavior::Delay,
            );
            // The immediate first tick carries nothing useful.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => self.flush(&spy).await,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spy_accumulates_sum_and_count() {
        let spy = CheckSpy::new();
        spy.report_check(Duration::from_millis(500));
        spy.report_check(Duration::from_millis(250));
        spy.report_error();
        let (time_sum, check_count, error_count) = spy.snapshot();
        assert!((time_sum - 0.75).abs() < 1e-9);
        assert_eq!(check_count, 2);
        assert_eq!(error_count, 1);
    }

    #[test]
    fn empty_spy_reports_zeroes() {
        let spy = CheckSpy::new();
        assert_eq!(spy.snapshot(), (0.0, 0, 0));
    }
}
