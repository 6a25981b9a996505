//! The persisted key layout. Compatibility-critical: existing deployments
//! read and write these exact keys, so every name below is load-bearing.

pub const TRIGGERS: &str = "moira-triggers-list";
pub const PATTERNS: &str = "moira-pattern-list";
pub const TAGS: &str = "moira-tags";
pub const EVENTS: &str = "moira-trigger-events";
pub const EVENTS_UI: &str = "moira-trigger-events-ui";
pub const TRIGGERS_CHECKS: &str = "moira-triggers-checks";
pub const TRIGGERS_TO_CHECK: &str = "moira-triggers-tocheck";
pub const TRIGGER_IN_BAD_STATE: &str = "moira-bad-state-triggers";
pub const CHECKS_COUNTER: &str = "moira-selfstate:checks-counter";
pub const NOTIFIER_NOTIFICATIONS: &str = "moira-notifier-notifications";

pub fn trigger(id: &str) -> String {
    format!("moira-trigger:{id}")
}

pub fn trigger_tags(id: &str) -> String {
    format!("moira-trigger-tags:{id}")
}

pub fn trigger_events(id: &str) -> String {
    format!("moira-trigger-events:{id}")
}

pub fn last_check(id: &str) -> String {
    format!("moira-metric-last-check:{id}")
}

pub fn check_lock(id: &str) -> String {
    format!("moira-metric-check-lock:{id}")
}

pub fn metric_data(metric: &str) -> String {
    format!("moira-metric-data:{metric}")
}

pub fn metric_retention(metric: &str) -> String {
    format!("moira-metric-retention:{metric}")
}

pub fn pattern_metrics(pattern: &str) -> String {
    format!("moira-pattern-metrics:{pattern}")
}

pub fn pattern_triggers(pattern: &str) -> String {
    format!("moira-pattern-triggers:{pattern}")
}

pub fn tag(name: &str) -> String {
    format!("moira-tag:{name}")
}

pub fn tag_triggers(name: &str) -> String {
    format!("moira-tag-triggers:{name}")
}

pub fn throttling_beginning(id: &str) -> String {
    format!("moira-notifier-throttling-beginning:{id}")
}

pub fn trigger_next(id: &str) -> String {
    format!("moira-notifier-next:{id}")
}
