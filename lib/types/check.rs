use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::state::State;

/// The per-metric point of truth used to decide event emission.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricState {
    pub state: State,
    pub timestamp: i64,
    pub event_timestamp: Option<i64>,
    pub value: Option<f64>,
    pub suppressed: Option<bool>,
    pub maintenance: Option<i64>,
}

impl MetricState {
    pub fn nodata(timestamp: i64) -> MetricState {
        MetricState {
            state: State::Nodata,
            timestamp,
            event_timestamp: None,
            value: None,
            suppressed: None,
            maintenance: None,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.unwrap_or(false)
    }
}

/// Snapshot of a trigger's last evaluation, persisted after every check.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckData {
    #[serde(default)]
    pub metrics: HashMap<String, MetricState>,
    pub state: State,
    pub timestamp: i64,
    pub score: Option<u64>,
    pub msg: Option<String>,
    pub event_timestamp: Option<i64>,
    pub suppressed: Option<bool>,
}

impl CheckData {
    pub fn new(state: State, timestamp: i64) -> CheckData {
        CheckData {
            metrics: HashMap::new(),
            state,
            timestamp,
            score: None,
            msg: None,
            event_timestamp: None,
            suppressed: None,
        }
    }

    /// Trigger score is the sum of all metric severities plus the severity
    /// of the trigger-level state.
    pub fn compute_score(&self) -> u64 {
        self.metrics.values().map(|m| m.state.score()).sum::<u64>()
            + self.state.score()
    }
}
