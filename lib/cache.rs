use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Worker-local suppression of repeated store calls.
///
/// `fresh` returns `true` when `(op, key)` has not fired within `ttl`. The
/// timestamp is recorded before the caller performs the underlying call, so
/// concurrent callers on the same worker coalesce into a single execution.
#[derive(Default)]
pub struct DedupCache {
    seen: Mutex<HashMap<(&'static str, String), Instant>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&self, op: &'static str, key: &str, ttl: Duration) -> bool {
        if ttl.is_zero() {
            return true;
        }
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap();
        match seen.get(&(op, key.to_string())) {
            | Some(inserted) if now.duration_since(*inserted) < ttl => false,
            | _ => {
                seen.insert((op, key.to_string()), now);
                true
            }
        }
    }

    /// Drops entries older than `ttl`. Called opportunistically by
    /// long-running owners to bound memory.
    pub fn evict_older_than(&self, ttl: Duration) {
        let now = Instant::now();
        self.seen
            .lock()
            .unwrap()
            .retain(|_, inserted| now.duration_since(*inserted) < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_within_ttl() {
        let cache = DedupCache::new();
        let ttl = Duration::from_secs(60);
        assert!(cache.fresh("add_trigger_check", "t1", ttl));
        assert!(!cache.fresh("add_trigger_check", "t1", ttl));
        // Different key or op is unaffected.
        assert!(cache.fresh("add_trigger_check", "t2", ttl));
        assert!(cache.fresh("cleanup", "t1", ttl));
    }

    #[test]
    fn zero_ttl_always_fires() {
        let cache = DedupCache::new();
        assert!(cache.fresh("add_trigger_check", "t1", Duration::ZERO));
        assert!(cache.fresh("add_trigger_check", "t1", Duration::ZERO));
    }

    #[test]
    fn eviction_drops_stale_entries() {
        let cache = DedupCache::new();
        assert!(cache.fresh("op", "k", Duration::from_secs(60)));
        cache.evict_older_than(Duration::ZERO);
        assert!(cache.fresh("op", "k", Duration::from_secs(60)));
    }
}
