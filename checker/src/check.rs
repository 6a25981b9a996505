use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use graphite::{evaluate_target, RequestContext, Series};
use lib::cache::DedupCache;
use lib::prelude::*;
use lib::store::Store;
use lib::types::{CheckData, MetricState, State, Trigger};
use tracing::{debug, info, warn};

use crate::error::CheckError;
use crate::event::compare_states;
use crate::expression::{get_expression, Env};

/// Evaluates one trigger end to end: target evaluation, per-metric state
/// stepping, TTL handling, event emission, and persisting the snapshot.
pub struct TriggerCheck {
    store: Arc<dyn Store>,
    cache: Arc<DedupCache>,
    metrics_ttl: i64,
    bad_states_reminder: HashMap<State, i64>,
}

/// One subject series (from the first target) paired with its previous
/// per-metric state.
struct Subject {
    series: Series,
    last_state: MetricState,
}

/// Targets 2..N each reduce to exactly one series; their values join the
/// expression environment and their metric states echo the subject's.
struct EchoTarget {
    name: String,
    series: Series,
}

impl EchoTarget {
    fn is_stub(&self) -> bool {
        self.series.stub
    }
}

struct TargetSeries {
    subjects: Vec<Subject>,
    echoes: Vec<EchoTarget>,
}

impl TriggerCheck {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<DedupCache>,
        metrics_ttl: i64,
        bad_states_reminder: &HashMap<String, i64>,
    ) -> TriggerCheck {
        let bad_states_reminder = bad_states_reminder
            .iter()
            .filter_map(|(name, interval)| {
                State::from_name(name).map(|state| (state, *interval))
            })
            .collect();
        TriggerCheck {
            store,
            cache,
            metrics_ttl,
            bad_states_reminder,
        }
    }

    pub async fn check(
        &self,
        trigger_id: &str,
        from_time: Option<i64>,
        now: Option<i64>,
        cache_ttl: u64,
    ) -> Result<(), CheckError> {
        let now = now.unwrap_or_else(|| Utc::now().timestamp());

        let Some(trigger) = self.store.get_trigger(trigger_id).await? else {
            return Ok(());
        };
        debug!(trigger_id, "Checking trigger");

        let mut maintenance = 0;
        for tag in &trigger.tags {
            let tag_data = self.store.get_tag(tag).await?;
            if let Some(until) = tag_data.maintenance {
                maintenance = maintenance.max(until);
            }
        }

        let last_check = match self
            .store
            .get_trigger_last_check(trigger_id)
            .await?
        {
            | Some(last_check) => last_check,
            | None => CheckData::new(
                State::Nodata,
                from_time.unwrap_or(now) - INITIAL_CHECK_WINDOW,
            ),
        };
        let from_time = from_time.unwrap_or(last_check.timestamp);

        let window = trigger.ttl.unwrap_or(0).max(600);
        let mut ctx = RequestContext::new(
            self.store.clone(),
            from_time - window,
            now,
        )
        .with_real_time(trigger.is_simple());

        let mut check = CheckData::new(State::Ok, now);
        check.metrics = last_check.metrics.clone();

        let outcome = self
            .evaluate(
                &mut ctx,
                &trigger,
                maintenance,
                &last_check,
                &mut check,
                now,
                cache_ttl,
            )
            .await;
        if let Err(error) = outcome {
            warn!(trigger_id, %error, "Trigger evaluation failed");
            check.state = State::Exception;
            check.msg = Some("Trigger evaluation exception".to_string());
            let mut last = last_check.clone();
            compare_states(
                self.store.as_ref(),
                &trigger,
                maintenance,
                &self.bad_states_reminder,
                &mut check,
                &mut last,
                now,
                None,
                None,
            )
            .await?;
        }

        check.score = Some(check.compute_score());
        self.store.set_trigger_last_check(trigger_id, &check).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn evaluate(
        &self,
        ctx: &mut RequestContext,
        trigger: &Trigger,
        maintenance: i64,
        last_check: &CheckData,
        check: &mut CheckData,
        now: i64,
        cache_ttl: u64,
    ) -> Result<(), CheckError> {
        let targets = self.target_series(ctx, trigger, last_check).await?;

        let cache_ttl = Duration::from_secs(cache_ttl);
        for metric in ctx.metrics.clone() {
            if self.cache.fresh("cleanup_metric_values", &metric, cache_ttl)
            {
                self.store
                    .cleanup_metric_values(&metric, now - self.metrics_ttl)
                    .await?;
            }
        }

        if targets.subjects.is_empty() {
            if trigger.ttl.is_some() {
                check.state = trigger.ttl_state();
                check.msg = Some("Trigger has no metrics".to_string());
                let mut last = last_check.clone();
                compare_states(
                    self.store.as_ref(),
                    trigger,
                    maintenance,
                    &self.bad_states_reminder,
                    check,
                    &mut last,
                    now,
                    None,
                    None,
                )
                .await?;
            }
            return Ok(());
        }

        // Seed the working snapshot with every series seen this round.
        for subject in &targets.subjects {
            check
                .metrics
                .entry(subject.series.name.clone())
                .or_insert_with(|| subject.last_state.clone());
        }
        for echo in &targets.echoes {
            if echo.is_stub() {
                continue;
            }
            let seeded = last_check
                .metrics
                .get(&echo.name)
                .cloned()
                .unwrap_or_else(|| {
                    MetricState::nodata(echo.series.start - INITIAL_CHECK_WINDOW)
                });
            check.metrics.entry(echo.name.clone()).or_insert(seeded);
        }

        for subject in &targets.subjects {
            self.step_subject(
                trigger,
                maintenance,
                last_check,
                check,
                &targets.echoes,
                subject,
                now,
            )
            .await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn step_subject(
        &self,
        trigger: &Trigger,
        maintenance: i64,
        last_check: &CheckData,
        check: &mut CheckData,
        echoes: &[EchoTarget],
        subject: &Subject,
        now: i64,
    ) -> Result<(), CheckError> {
        let name = subject.series.name.clone();
        let mut last_state = subject.last_state.clone();
        let mut metric_state = check
            .metrics
            .get(&name)
            .cloned()
            .unwrap_or_else(|| last_state.clone());

        // Nothing at or before the checkpoint is ever re-evaluated, even
        // when samples arrive late.
        let checkpoint = (last_state.timestamp - CHECKPOINT_GAP)
            .max(metric_state.event_timestamp.unwrap_or(0));

        let step = subject.series.step.max(1);
        let mut ts = subject.series.start;
        while ts <= now {
            if ts <= checkpoint {
                ts += step;
                continue;
            }
            let Some(values) = expression_values(subject, echoes, ts) else {
                ts += step;
                continue;
            };
            let t1_value = values["t1"];

            let env = Env {
                targets: values,
                warn_value: trigger.warn_value,
                error_value: trigger.error_value,
                prev_state: metric_state.state,
            };
            let state = get_expression(trigger.expression.as_deref(), &env)?;

            metric_state.state = state;
            metric_state.timestamp = ts;
            metric_state.value = Some(t1_value);
            for echo in echoes {
                if let Some(echo_state) = check.metrics.get_mut(&echo.name)
                {
                    echo_state.state = state;
                    echo_state.timestamp = ts;
                    echo_state.value = echo.series.value_at(ts);
                }
            }

            compare_states(
                self.store.as_ref(),
                trigger,
                maintenance,
                &self.bad_states_reminder,
                &mut metric_state,
                &mut last_state,
                ts,
                Some(t1_value),
                Some(&name),
            )
            .await?;
            ts += step;
        }

        // Compare against the previous snapshot's clock: a metric that has
        // been silent for longer than the ttl takes its default state.
        if let Some(ttl) = trigger.ttl {
            if metric_state.timestamp + ttl < last_check.timestamp {
                info!(metric = name, "Metric TTL expired");
                if trigger.ttl_state() == State::Del
                    && metric_state.event_timestamp.is_some()
                {
                    info!(metric = name, "Removing stale metric");
                    check.metrics.remove(&name);
                    for echo in echoes {
                        check.metrics.remove(&echo.name);
                    }
                    for pattern in &trigger.patterns {
                        self.store.del_pattern_metrics(pattern).await?;
                    }
                    return Ok(());
                }
                metric_state.state = trigger.ttl_state().to_metric_state();
                metric_state.timestamp = last_check.timestamp - ttl;
                metric_state.value = None;
                for echo in echoes {
                    if let Some(echo_state) =
                        check.metrics.get_mut(&echo.name)
                    {
                        echo_state.state = metric_state.state;
                        echo_state.timestamp = metric_state.timestamp;
                        echo_state.value = None;
                    }
                }
                let metric_state_timestamp = metric_state.timestamp;
                compare_states(
                    self.store.as_ref(),
                    trigger,
                    maintenance,
                    &self.bad_states_reminder,
                    &mut metric_state,
                    &mut last_state,
                    metric_state_timestamp,
                    None,
                    Some(&name),
                )
                .await?;
            }
        }

        check.metrics.insert(name, metric_state);
        Ok(())
    }

    /// Evaluates every target. The first target's series become the
    /// subjects; every other target must reduce to exactly one series.
    /// Stub series keep the bookkeeping uniform but are never subjects.
    async fn target_series(
        &self,
        ctx: &mut RequestContext,
        trigger: &Trigger,
        last_check: &CheckData,
    ) -> Result<TargetSeries, CheckError> {
        let mut subjects = Vec::new();
        let mut echoes = Vec::new();

        for (index, target) in trigger.targets.iter().enumerate() {
            let number = index + 1;
            let series_list = evaluate_target(ctx, target).await?;

            if number == 1 {
                for series in series_list {
                    if series.stub {
                        continue;
                    }
                    let last_state = last_check
                        .metrics
                        .get(&series.name)
                        .cloned()
                        .unwrap_or_else(|| {
                            MetricState::nodata(
                                series.start - INITIAL_CHECK_WINDOW,
                            )
                        });
                    subjects.push(Subject { series, last_state });
                }
            } else {
                if series_list.len() != 1 {
                    return Err(CheckError::TargetArity {
                        number,
                        count: series_list.len(),
                    });
                }
                let series = series_list.into_iter().next().unwrap();
                echoes.push(EchoTarget {
                    name: series.name.clone(),
                    series,
                });
            }
        }
        Ok(TargetSeries { subjects, echoes })
    }
}

/// Gathers `{t1..tN}` at one timestamp; None when any input is absent.
fn expression_values(
    subject: &Subject,
    echoes: &[EchoTarget],
    ts: i64,
) -> Option<HashMap<String, f64>> {
    let mut values = HashMap::new();
    values.insert("t1".to_string(), subject.series.value_at(ts)?);
    for (index, echo) in echoes.iter().enumerate() {
        let name = format!("t{}", index + 2);
        values.insert(name, echo.series.value_at(ts)?);
    }
    Some(values)
}
