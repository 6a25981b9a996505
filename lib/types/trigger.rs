use chrono::{DateTime, Datelike};
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::skip_serializing_none;

use super::state::State;

/// A stored alert definition. The document in the store carries everything
/// except `id` and `tags`, which live in their own keys and are stitched in
/// on read.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Trigger {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub warn_value: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub error_value: Option<f64>,
    pub expression: Option<String>,
    #[serde(default, deserialize_with = "de_opt_i64")]
    pub ttl: Option<i64>,
    pub ttl_state: Option<State>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    pub sched: Option<Schedule>,
}

impl Trigger {
    /// Sorted tags, floats for thresholds and an integer ttl are the
    /// normalized form handed out by the store.
    pub fn normalize(mut self, id: &str, mut tags: Vec<String>) -> Trigger {
        self.id = id.to_string();
        tags.sort();
        self.tags = tags;
        self
    }

    pub fn ttl_state(&self) -> State {
        self.ttl_state.unwrap_or(State::Nodata)
    }

    /// A trigger is "simple" when its targets resolve to a single pattern
    /// without any glob syntax. Simple triggers are eligible for real-time
    /// (partial last bucket) alerting.
    pub fn is_simple(&self) -> bool {
        match self.patterns.as_slice() {
            | [pattern] => {
                !pattern.contains(['*', '?', '{', '['])
            }
            | _ => false,
        }
    }

    /// Whether the schedule allows events at epoch `ts`. No schedule allows
    /// everything.
    pub fn is_sched_allows(&self, ts: i64) -> bool {
        match &self.sched {
            | None => true,
            | Some(sched) => sched.allows(ts),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    // Monday-indexed, 7 entries.
    pub days: Vec<ScheduleDay>,
    #[serde(rename = "startOffset")]
    pub start_offset: i64,
    #[serde(rename = "endOffset")]
    pub end_offset: i64,
    #[serde(rename = "tzOffset")]
    pub tz_offset: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleDay {
    pub enabled: bool,
    #[serde(default)]
    pub name: String,
}

impl Schedule {
    pub fn allows(&self, ts: i64) -> bool {
        // Minute-truncated local time; tz offset is minutes west of UTC.
        let local = ts - ts.rem_euclid(60) - self.tz_offset * 60;
        let Some(date) = DateTime::from_timestamp(local, 0) else {
            return false;
        };
        let weekday = date.weekday().num_days_from_monday() as usize;
        if !self.days.get(weekday).map(|d| d.enabled).unwrap_or(false) {
            return false;
        }
        let day_start = local - local.rem_euclid(86400);
        local >= day_start + self.start_offset * 60
            && local <= day_start + self.end_offset * 60
    }
}

// Stored documents written by older clients carry numeric fields as strings
// ("600" for ttl, "60" for thresholds). Accept both encodings.
fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }
    match Option::<Raw>::deserialize(deserializer)? {
        | None => Ok(None),
        | Some(Raw::Num(v)) => Ok(Some(v)),
        | Some(Raw::Str(s)) if s.is_empty() => Ok(None),
        | Some(Raw::Str(s)) => {
            s.parse().map(Some).map_err(serde::de::Error::custom)
        }
    }
}

fn de_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }
    match Option::<Raw>::deserialize(deserializer)? {
        | None => Ok(None),
        | Some(Raw::Num(v)) => Ok(Some(v)),
        | Some(Raw::Str(s)) if s.is_empty() => Ok(None),
        | Some(Raw::Str(s)) => {
            s.parse().map(Some).map_err(serde::de::Error::custom)
        }
    }
}
