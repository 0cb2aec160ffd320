//! Tiered token-bucket rate limiter with bounded asynchronous waiting.
//!
//! Each tier owns an independent bucket refilled lazily on access. Callers
//! that cannot be served immediately wait in strict FIFO order behind a
//! per-bucket turnstile; a later caller can never overtake an earlier one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Immutable description of one tier's bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketConfig {
    pub capacity: u64,
    pub refill_tokens: u64,
    pub refill_interval: Duration,
    pub max_wait: Duration,
}

impl BucketConfig {
    pub fn new(capacity: u64, refill_tokens: u64, refill_interval: Duration, max_wait: Duration) -> Self {
        Self {
            capacity,
            refill_tokens,
            refill_interval,
            max_wait,
        }
    }
}

/// Partial update applied by [`TieredRateLimiter::update_config`].
#[derive(Debug, Clone, Default)]
pub struct BucketConfigPatch {
    pub capacity: Option<u64>,
    pub refill_tokens: Option<u64>,
    pub refill_interval: Option<Duration>,
    pub max_wait: Option<Duration>,
}

/// Counters snapshot for one tier.
#[derive(Debug, Clone, PartialEq)]
pub struct TierMetrics {
    pub available: u64,
    pub capacity: u64,
    pub total_requests: u64,
    pub accepted: u64,
    pub rate_limited: u64,
    pub avg_wait_ms: f64,
    pub since_last_refill: Duration,
}

struct BucketState {
    config: BucketConfig,
    available: u64,
    last_refill: Instant,
    total_requests: u64,
    accepted: u64,
    rate_limited: u64,
    wait_ms_total: u64,
    waited_count: u64,
}

impl BucketState {
    fn new(config: BucketConfig) -> Self {
        Self {
            available: config.capacity,
            config,
            last_refill: Instant::now(),
            total_requests: 0,
            accepted: 0,
            rate_limited: 0,
            wait_ms_total: 0,
            waited_count: 0,
        }
    }

    /// Lazy refill: credit whole elapsed intervals and advance `last_refill`
    /// by exactly the credited amount, never past `now`.
    fn refill(&mut self, now: Instant) {
        let interval = self.config.refill_interval;
        if interval.is_zero() || self.config.refill_tokens == 0 {
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        let periods = (elapsed.as_nanos() / interval.as_nanos()) as u64;
        if periods == 0 {
            return;
        }
        self.available = self
            .available
            .saturating_add(periods.saturating_mul(self.config.refill_tokens))
            .min(self.config.capacity);
        self.last_refill += Duration::from_nanos(
            (interval.as_nanos() as u64).saturating_mul(periods),
        );
    }
}

enum Decision {
    Accepted,
    Rejected,
    Wait(Duration),
}

struct Bucket {
    /// Fair queue: tokio mutexes wake waiters in FIFO order, so holding the
    /// turnstile across the refill sleep gives waiting callers strict
    /// arrival-order service.
    turnstile: Mutex<()>,
    state: StdMutex<BucketState>,
}

impl Bucket {
    fn new(config: BucketConfig) -> Self {
        Self {
            turnstile: Mutex::new(()),
            state: StdMutex::new(BucketState::new(config)),
        }
    }

    fn decide(&self, n: u64, already_waited: Duration) -> Decision {
        let mut st = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        st.refill(Instant::now());

        if n > st.config.capacity {
            st.rate_limited += 1;
            return Decision::Rejected;
        }
        if st.available >= n {
            st.available -= n;
            st.accepted += 1;
            return Decision::Accepted;
        }
        if st.config.refill_tokens == 0 || st.config.refill_interval.is_zero() {
            st.rate_limited += 1;
            return Decision::Rejected;
        }

        let needed = n - st.available;
        let periods = needed.div_ceil(st.config.refill_tokens);
        let wait = Duration::from_nanos(
            (st.config.refill_interval.as_nanos() as u64).saturating_mul(periods),
        );
        if already_waited + wait > st.config.max_wait {
            st.rate_limited += 1;
            return Decision::Rejected;
        }
        Decision::Wait(wait)
    }

    async fn consume(&self, tier: &str, n: u64) -> bool {
        if n == 0 {
            return true;
        }

        let _turn = self.turnstile.lock().await;

        {
            let mut st = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            st.total_requests += 1;
        }

        let mut waited = Duration::ZERO;
        loop {
            match self.decide(n, waited) {
                Decision::Accepted => {
                    if !waited.is_zero() {
                        let mut st = self
                            .state
                            .lock()
                            .unwrap_or_else(std::sync::PoisonError::into_inner);
                        st.wait_ms_total += waited.as_millis() as u64;
                        st.waited_count += 1;
                        debug!(
                            "rate limiter: tier '{}' served after {}ms wait",
                            tier,
                            waited.as_millis()
                        );
                    }
                    return true;
                }
                Decision::Rejected => {
                    warn!(
                        "rate limiter: tier '{}' rejected request for {} token(s)",
                        tier, n
                    );
                    return false;
                }
                Decision::Wait(wait) => {
                    tokio::time::sleep(wait).await;
                    waited += wait;
                    // Loop again: normally the tokens are there on re-entry
                    // (nobody can jump the turnstile); a concurrent config
                    // shrink re-enters the decision with the wait budget
                    // already spent.
                }
            }
        }
    }

    fn metrics(&self) -> TierMetrics {
        let mut st = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        st.refill(now);
        TierMetrics {
            available: st.available,
            capacity: st.config.capacity,
            total_requests: st.total_requests,
            accepted: st.accepted,
            rate_limited: st.rate_limited,
            avg_wait_ms: if st.waited_count == 0 {
                0.0
            } else {
                st.wait_ms_total as f64 / st.waited_count as f64
            },
            since_last_refill: now.saturating_duration_since(st.last_refill),
        }
    }

    fn reset(&self) {
        let mut st = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        st.available = st.config.capacity;
        st.last_refill = Instant::now();
        st.total_requests = 0;
        st.accepted = 0;
        st.rate_limited = 0;
        st.wait_ms_total = 0;
        st.waited_count = 0;
    }

    fn update_config(&self, patch: &BucketConfigPatch) {
        let mut st = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        st.refill(Instant::now());
        if let Some(capacity) = patch.capacity {
            st.config.capacity = capacity;
        }
        if let Some(refill_tokens) = patch.refill_tokens {
            st.config.refill_tokens = refill_tokens;
        }
        if let Some(refill_interval) = patch.refill_interval {
            st.config.refill_interval = refill_interval;
        }
        if let Some(max_wait) = patch.max_wait {
            st.config.max_wait = max_wait;
        }
        // Shrinking capacity clamps immediately.
        st.available = st.available.min(st.config.capacity);
    }
}

/// The default tier every unclassified request lands in.
pub const DEFAULT_TIER: &str = "default";

/// Map of independent token buckets keyed by tier name.
pub struct TieredRateLimiter {
    buckets: HashMap<String, Arc<Bucket>>,
}

impl TieredRateLimiter {
    /// Built-in tiers mirroring outbound traffic classes.
    pub fn default_tiers() -> HashMap<String, BucketConfig> {
        let second = Duration::from_secs(1);
        HashMap::from([
            (
                "read".to_string(),
                BucketConfig::new(100, 50, second, Duration::from_secs(10)),
            ),
            (
                "write".to_string(),
                BucketConfig::new(50, 25, second, Duration::from_secs(10)),
            ),
            (
                "admin".to_string(),
                BucketConfig::new(10, 5, second, Duration::from_secs(5)),
            ),
            (
                DEFAULT_TIER.to_string(),
                BucketConfig::new(60, 30, second, Duration::from_secs(10)),
            ),
        ])
    }

    pub fn new(tiers: HashMap<String, BucketConfig>) -> Self {
        let mut buckets: HashMap<String, Arc<Bucket>> = tiers
            .into_iter()
            .map(|(name, config)| (name, Arc::new(Bucket::new(config))))
            .collect();
        // Every limiter can classify into `default`.
        buckets.entry(DEFAULT_TIER.to_string()).or_insert_with(|| {
            Arc::new(Bucket::new(BucketConfig::new(
                60,
                30,
                Duration::from_secs(1),
                Duration::from_secs(10),
            )))
        });
        Self { buckets }
    }

    fn bucket(&self, tier: &str) -> &Arc<Bucket> {
        self.buckets
            .get(tier)
            .unwrap_or_else(|| &self.buckets[DEFAULT_TIER])
    }

    /// Take one token from `tier`, waiting within the tier's bounded window.
    pub async fn consume(&self, tier: &str) -> bool {
        self.consume_n(tier, 1).await
    }

    /// Take `n` tokens from `tier`. Returns `false` when the request cannot
    /// be satisfied within `max_wait` or exceeds the bucket's capacity
    /// outright. `n = 0` is a no-op that always succeeds.
    pub async fn consume_n(&self, tier: &str, n: u64) -> bool {
        self.bucket(tier).consume(tier, n).await
    }

    pub fn metrics(&self, tier: &str) -> Option<TierMetrics> {
        self.buckets.get(tier).map(|b| b.metrics())
    }

    pub fn all_metrics(&self) -> HashMap<String, TierMetrics> {
        self.buckets
            .iter()
            .map(|(name, bucket)| (name.clone(), bucket.metrics()))
            .collect()
    }

    /// Reset one tier (or all when `None`): counters to zero, bucket to
    /// capacity.
    pub fn reset(&self, tier: Option<&str>) {
        match tier {
            Some(name) => {
                if let Some(bucket) = self.buckets.get(name) {
                    bucket.reset();
                }
            }
            None => {
                for bucket in self.buckets.values() {
                    bucket.reset();
                }
            }
        }
    }

    /// Apply a partial config update to a live tier. Unknown tiers are
    /// ignored with a warning; tiers are fixed at construction.
    pub fn update_config(&self, tier: &str, patch: &BucketConfigPatch) {
        match self.buckets.get(tier) {
            Some(bucket) => bucket.update_config(patch),
            None => warn!("rate limiter: update for unknown tier '{}' ignored", tier),
        }
    }

    pub fn tiers(&self) -> Vec<&str> {
        self.buckets.keys().map(String::as_str).collect()
    }
}

impl Default for TieredRateLimiter {
    fn default() -> Self {
        Self::new(Self::default_tiers())
    }
}

#[cfg(test)]
mod tests;
