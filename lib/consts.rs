use std::time::Duration;

// Checker loop pacing.
pub const PERFORM_INTERVAL: Duration = Duration::from_millis(10);
pub const ERROR_TIMEOUT: Duration = Duration::from_secs(10);

// Timestamps older than the last evaluated point minus this gap are never
// re-evaluated, even when late samples arrive for them.
pub const CHECKPOINT_GAP: i64 = 120;

// Window used to seed a brand new last-check snapshot.
pub const INITIAL_CHECK_WINDOW: i64 = 3600;

// Per-trigger event logs are trimmed past this horizon on every write.
pub const TRIGGER_EVENTS_TTL: i64 = 3600 * 24 * 30;

// Lock polling used by bounded acquisition (maintenance paths).
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(500);
