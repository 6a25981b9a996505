use std::collections::HashMap;

use lib::store::{Store, StoreError};
use lib::types::{CheckData, Event, MetricState, State, Trigger};
use tracing::info;

/// The fields event emission reads and writes, shared by per-metric states
/// and the trigger-level snapshot.
pub trait StatePoint: Send {
    fn state(&self) -> State;
    fn set_state(&mut self, state: State);
    fn event_timestamp(&self) -> Option<i64>;
    fn set_event_timestamp(&mut self, timestamp: i64);
    fn is_suppressed(&self) -> bool;
    fn set_suppressed(&mut self, suppressed: bool);
    fn maintenance(&self) -> i64;
}

impl StatePoint for MetricState {
    fn state(&self) -> State {
        self.state
    }

    fn set_state(&mut self, state: State) {
        self.state = state;
    }

    fn event_timestamp(&self) -> Option<i64> {
        self.event_timestamp
    }

    fn set_event_timestamp(&mut self, timestamp: i64) {
        self.event_timestamp = Some(timestamp);
    }

    fn is_suppressed(&self) -> bool {
        self.suppressed.unwrap_or(false)
    }

    fn set_suppressed(&mut self, suppressed: bool) {
        self.suppressed = Some(suppressed);
    }

    fn maintenance(&self) -> i64 {
        self.maintenance.unwrap_or(0)
    }
}

impl StatePoint for CheckData {
    fn state(&self) -> State {
        self.state
    }

    fn set_state(&mut self, state: State) {
        self.state = state;
    }

    fn event_timestamp(&self) -> Option<i64> {
        self.event_timestamp
    }

    fn set_event_timestamp(&mut self, timestamp: i64) {
        self.event_timestamp = Some(timestamp);
    }

    fn is_suppressed(&self) -> bool {
        self.suppressed.unwrap_or(false)
    }

    fn set_suppressed(&mut self, suppressed: bool) {
        self.suppressed = Some(suppressed);
    }

    fn maintenance(&self) -> i64 {
        0
    }
}

/// Decides whether the transition from `last` to `current` produces an
/// event, applying repeat dedup, bad-state reminders, and schedule and
/// maintenance suppression. Suppression never swallows a recovery: leaving
/// a suppressed bad state for OK always surfaces.
#[allow(clippy::too_many_arguments)]
pub async fn compare_states(
    store: &dyn Store,
    trigger: &Trigger,
    trigger_maintenance: i64,
    reminders: &HashMap<State, i64>,
    current: &mut dyn StatePoint,
    last: &mut dyn StatePoint,
    timestamp: i64,
    value: Option<f64>,
    metric: Option<&str>,
) -> Result<(), StoreError> {
    let current_state = current.state();
    let last_state = last.state();
    last.set_state(current_state);

    if current.event_timestamp().is_none() {
        current.set_event_timestamp(timestamp);
    }

    let mut event = Event {
        trigger_id: trigger.id.clone(),
        state: current_state,
        old_state: last_state,
        timestamp,
        metric: metric.map(|m| m.to_string()),
        value: None,
        msg: None,
    };

    if current_state == last_state {
        let elapsed =
            timestamp - last.event_timestamp().unwrap_or(timestamp);
        match reminders.get(&current_state) {
            | Some(interval) if elapsed >= *interval => {
                event.msg = Some(format!(
                    "This metric has been in bad state for more than {} \
                     hours - please, fix.",
                    interval / 3600
                ));
            }
            | _ => {
                if !last.is_suppressed() || current_state == State::Ok {
                    return Ok(());
                }
            }
        }
    }

    current.set_event_timestamp(timestamp);
    last.set_event_timestamp(timestamp);
    event.value = value;
    current.set_suppressed(false);
    last.set_suppressed(false);

    if !trigger.is_sched_allows(timestamp) {
        current.set_suppressed(true);
        info!(
            trigger_id = trigger.id,
            metric, "Event suppressed by trigger schedule"
        );
        return Ok(());
    }
    let state_maintenance = current.maintenance();
    if trigger_maintenance >= timestamp {
        current.set_suppressed(true);
        info!(
            trigger_id = trigger.id,
            until = trigger_maintenance,
            "Event suppressed by trigger maintenance"
        );
    } else if state_maintenance >= timestamp {
        current.set_suppressed(true);
        info!(
            trigger_id = trigger.id,
            metric,
            until = state_maintenance,
            "Event suppressed by metric maintenance"
        );
    } else {
        info!(
            trigger_id = trigger.id,
            metric,
            state = %event.state,
            old_state = %event.old_state,
            "Writing new event"
        );
        store.push_event(&event, true).await?;
    }
    Ok(())
}
