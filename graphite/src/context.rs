use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use lib::store::Store;

/// Everything one target evaluation needs, threaded through every fetch and
/// function call instead of living in globals.
pub struct RequestContext {
    pub store: Arc<dyn Store>,
    pub start_time: i64,
    pub end_time: i64,
    /// Simple triggers may alert on the partial last bucket.
    pub allow_real_time: bool,
    /// Bootstrap fetches always materialize the last bucket so window
    /// functions can trim a known overlap.
    pub bootstrap: bool,
    /// Every path expression seen, mapped to the metric names it resolved
    /// to. Consumers derive trigger patterns and simplicity from the keys.
    pub graphite_patterns: BTreeMap<String, BTreeSet<String>>,
    /// Every stored metric touched by the evaluation; the checker trims
    /// these against the retention horizon afterwards.
    pub metrics: BTreeSet<String>,
}

impl RequestContext {
    pub fn new(
        store: Arc<dyn Store>,
        start_time: i64,
        end_time: i64,
    ) -> RequestContext {
        RequestContext {
            store,
            start_time,
            end_time,
            allow_real_time: false,
            bootstrap: false,
            graphite_patterns: BTreeMap::new(),
            metrics: BTreeSet::new(),
        }
    }

    pub fn with_real_time(mut self, allow: bool) -> RequestContext {
        self.allow_real_time = allow;
        self
    }

    /// A derived context for re-fetching over a shifted window. Pattern and
    /// metric bookkeeping is merged back by [`RequestContext::absorb`].
    pub fn shifted(&self, start_time: i64, end_time: i64) -> RequestContext {
        RequestContext {
            store: self.store.clone(),
            start_time,
            end_time,
            allow_real_time: self.allow_real_time,
            bootstrap: self.bootstrap,
            graphite_patterns: BTreeMap::new(),
            metrics: BTreeSet::new(),
        }
    }

    /// Bootstrap window ending where this context begins.
    pub fn bootstrap_window(&self, seconds: i64) -> RequestContext {
        let mut ctx =
            self.shifted(self.start_time - seconds, self.start_time);
        ctx.bootstrap = true;
        ctx
    }

    pub fn absorb(&mut self, child: RequestContext) {
        for (pattern, names) in child.graphite_patterns {
            self.graphite_patterns
                .entry(pattern)
                .or_default()
                .extend(names);
        }
        self.metrics.extend(child.metrics);
    }
}
