use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use indexmap::IndexMap;
use parking_lot::Mutex;

type KeyedLimiter = GovernorRateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// A burst of one-quarter of the per-minute rate (spec §4.4), floored at 1
/// so a configured rate below 4/min still admits something.
fn quota(rate_per_min: u32) -> Quota {
    let rate = NonZeroU32::new(rate_per_min.max(1)).unwrap();
    let burst = NonZeroU32::new((rate_per_min / 4).max(1)).unwrap();
    Quota::per_minute(rate).allow_burst(burst)
}

/// Snapshot for the `GET /stats` adjunct (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct RateLimiterStats {
    pub http_sources: usize,
    pub ws_sources: usize,
    pub connections_per_source: Vec<(String, usize)>,
}

/// Per-source-address rate limiting and concurrent-session capping (spec
/// §4.4). `http` and `ws` are independent `governor` keyed limiters (GCRA),
/// the same algorithm `rumblefrog-lrthrome`'s `KeyedRateLimiter<IpAddr,
/// GCRA>` applies per-IP, so a chatty signaling session can't starve a
/// source's ability to hit `/health`/`/stats`. Connection-slot capping has
/// no rate-limiting analogue -- it bounds a concurrent count, not a rate --
/// so it stays a plain counter map guarded by its own lock.
pub struct RateLimiter {
    http: KeyedLimiter,
    ws: KeyedLimiter,
    http_rate_per_min: u32,
    max_sessions_per_source: usize,
    slots: Mutex<IndexMap<String, usize>>,
}

impl RateLimiter {
    pub fn new(
        http_rate_per_min: u32,
        ws_rate_per_min: u32,
        max_sessions_per_source: usize,
    ) -> Self {
        Self {
            http: GovernorRateLimiter::keyed(quota(http_rate_per_min)),
            ws: GovernorRateLimiter::keyed(quota(ws_rate_per_min)),
            http_rate_per_min,
            max_sessions_per_source,
            slots: Mutex::new(IndexMap::new()),
        }
    }

    pub fn allow_http(&self, source: &str) -> bool {
        self.http.check_key(&source.to_string()).is_ok()
    }

    pub fn allow_ws(&self, source: &str) -> bool {
        self.ws.check_key(&source.to_string()).is_ok()
    }

    /// Reserves a connection slot for `source`. Fails if accepting it would
    /// exceed the configured per-source cap.
    pub fn acquire_connection_slot(&self, source: &str) -> bool {
        let mut slots = self.slots.lock();
        let count = slots.entry(source.to_string()).or_insert(0);
        if *count >= self.max_sessions_per_source {
            false
        } else {
            *count += 1;
            true
        }
    }

    pub fn release_connection_slot(&self, source: &str) {
        let mut slots = self.slots.lock();
        if let Some(count) = slots.get_mut(source) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                slots.shift_remove(source);
            }
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            http_sources: self.http.len(),
            ws_sources: self.ws.len(),
            connections_per_source: self
                .slots
                .lock()
                .iter()
                .map(|(source, count)| (source.clone(), *count))
                .collect(),
        }
    }

    /// Drops keyed-limiter state for sources that have sat idle long enough
    /// to refill to full capacity, bounding memory for a long-running
    /// process with a lot of transient source addresses. Run periodically
    /// by a background task.
    pub fn prune(&self) {
        self.http.retain_recent();
        self.ws.retain_recent();
    }

    pub fn max_sessions_per_source(&self) -> usize {
        self.max_sessions_per_source
    }

    /// The configured HTTP rate, surfaced for the `X-RateLimit-Limit`
    /// header on a 429 response (spec §7).
    pub fn http_rate_per_min(&self) -> u32 {
        self.http_rate_per_min
    }
}

/// Background task matching the engine-level reaper's shape (spec §4.4):
/// prunes idle keyed-limiter state at `interval` until cancelled.
pub async fn spawn_pruner(limiter: std::sync::Arc<RateLimiter>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        limiter.prune();
    }
}
