use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::state::State;

/// Append-only record of a state transition for one (trigger, metric) pair,
/// or for the trigger itself when `metric` is absent.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub trigger_id: String,
    pub state: State,
    pub old_state: State,
    pub timestamp: i64,
    pub metric: Option<String>,
    pub value: Option<f64>,
    pub msg: Option<String>,
}
