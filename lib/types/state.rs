use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Discrete evaluation outcome for a trigger or a single metric.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    Ok,
    Warn,
    Error,
    #[default]
    Nodata,
    Exception,
    Del,
}

impl State {
    /// Numeric severity used for the trigger-level score ranking.
    pub fn score(self) -> u64 {
        match self {
            | State::Ok | State::Del => 0,
            | State::Warn => 1,
            | State::Error => 100,
            | State::Nodata => 1000,
            | State::Exception => 100_000,
        }
    }

    /// DEL is a policy marker, not a state a metric can rest in.
    pub fn to_metric_state(self) -> State {
        match self {
            | State::Del => State::Nodata,
            | other => other,
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            | State::Ok => "OK",
            | State::Warn => "WARN",
            | State::Error => "ERROR",
            | State::Nodata => "NODATA",
            | State::Exception => "EXCEPTION",
            | State::Del => "DEL",
        };
        write!(f, "{name}")
    }
}

impl State {
    pub fn from_name(name: &str) -> Option<State> {
        match name {
            | "OK" => Some(State::Ok),
            | "WARN" | "WARNING" => Some(State::Warn),
            | "ERROR" => Some(State::Error),
            | "NODATA" => Some(State::Nodata),
            | "EXCEPTION" => Some(State::Exception),
            | "DEL" => Some(State::Del),
            | _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ladder() {
        assert_eq!(State::Ok.score(), 0);
        assert_eq!(State::Del.score(), 0);
        assert_eq!(State::Warn.score(), 1);
        assert_eq!(State::Error.score(), 100);
        assert_eq!(State::Nodata.score(), 1000);
        assert_eq!(State::Exception.score(), 100_000);
    }

    #[test]
    fn serde_names_are_uppercase() {
        assert_eq!(serde_json::to_string(&State::Nodata).unwrap(), "\"NODATA\"");
        let s: State = serde_json::from_str("\"DEL\"").unwrap();
        assert_eq!(s, State::Del);
    }

    #[test]
    fn del_maps_to_nodata_for_metrics() {
        assert_eq!(State::Del.to_metric_state(), State::Nodata);
        assert_eq!(State::Warn.to_metric_state(), State::Warn);
    }
}
