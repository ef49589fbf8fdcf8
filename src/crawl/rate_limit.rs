//! Per-domain token-bucket rate limiting
//!
//! One bucket per domain, created lazily on first use. The default mode is a
//! capacity-1 bucket, which serializes requests to a host with at least the
//! configured interval between token grants. `release` returns a token early
//! after a request completes so fast hosts recover capacity sooner.

use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;
use tracing::trace;

/// Per-domain token buckets behind one shared handle.
///
/// This is the only cross-crawl shared mutable state: concurrent crawls
/// targeting the same domain share its bucket, and refill/consume runs under
/// a lock so tokens cannot be double-spent.
pub struct DomainRateLimiter {
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
    default_interval: Duration,
    max_tokens: u32,
}

impl DomainRateLimiter {
    /// Create a limiter with a default inter-request interval and bucket
    /// capacity applied to domains without an explicit override.
    pub fn new(default_interval: Duration, max_tokens: u32) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            default_interval,
            max_tokens: max_tokens.max(1),
        }
    }

    /// Acquire a token for `domain`, suspending until one is available.
    /// Waiters are served in arrival order.
    pub async fn acquire(&self, domain: &str) {
        let bucket = self.bucket(domain).await;
        bucket.acquire().await;
    }

    /// Return a token early, never exceeding the bucket's capacity
    pub async fn release(&self, domain: &str) {
        let bucket = self.bucket(domain).await;
        bucket.release();
    }

    /// Override the inter-request interval for one domain
    pub async fn set_rate_limit(&self, domain: &str, interval: Duration) {
        let bucket = self.bucket(domain).await;
        bucket.set_interval(interval);
    }

    /// Effective inter-request interval for a domain (the default if unset)
    pub async fn get_rate_limit(&self, domain: &str) -> Duration {
        let buckets = self.buckets.read().await;
        buckets
            .get(domain)
            .map(|b| b.interval())
            .unwrap_or(self.default_interval)
    }

    async fn bucket(&self, domain: &str) -> Arc<TokenBucket> {
        {
            let buckets = self.buckets.read().await;
            if let Some(bucket) = buckets.get(domain) {
                return Arc::clone(bucket);
            }
        }
        let mut buckets = self.buckets.write().await;
        Arc::clone(buckets.entry(domain.to_string()).or_insert_with(|| {
            Arc::new(TokenBucket::new(self.default_interval, self.max_tokens))
        }))
    }
}

/// Token bucket for one domain
struct TokenBucket {
    /// Plain counters, consistent after any single store; a poisoned lock
    /// is recovered rather than propagated.
    state: StdMutex<BucketState>,
    /// Arrival-order turnstile: tokio mutexes wake waiters FIFO, so callers
    /// queued here cannot starve each other under contention.
    turnstile: Mutex<()>,
    /// Woken when `release` returns a token, so a sleeping waiter can claim
    /// it before its full refill deadline.
    released: Notify,
}

struct BucketState {
    tokens: u32,
    max_tokens: u32,
    interval: Duration,
    last_refill: Instant,
}

impl BucketState {
    /// Add `floor(elapsed / interval)` tokens, capped at capacity
    fn refill(&mut self, now: Instant) {
        if self.interval.is_zero() {
            self.tokens = self.max_tokens;
            self.last_refill = now;
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        let new_tokens =
            (elapsed.as_nanos() / self.interval.as_nanos()).min(u128::from(u32::MAX)) as u32;
        if new_tokens > 0 {
            self.tokens = (self.tokens + new_tokens).min(self.max_tokens);
            self.last_refill += self.interval * new_tokens;
        }
    }

    /// Time until the next refill produces a token
    fn next_token_in(&self, now: Instant) -> Duration {
        (self.last_refill + self.interval).saturating_duration_since(now)
    }
}

impl TokenBucket {
    fn new(interval: Duration, max_tokens: u32) -> Self {
        Self {
            state: StdMutex::new(BucketState {
                tokens: max_tokens,
                max_tokens,
                interval,
                last_refill: Instant::now(),
            }),
            turnstile: Mutex::new(()),
            released: Notify::new(),
        }
    }

    async fn acquire(&self) {
        let _turn = self.turnstile.lock().await;
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();
                state.refill(now);
                if state.tokens > 0 {
                    state.tokens -= 1;
                    return;
                }
                state.next_token_in(now)
            };
            trace!("rate limit: waiting {:?} for token", wait);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.released.notified() => {}
            }
        }
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tokens = (state.tokens + 1).min(state.max_tokens);
        drop(state);
        self.released.notify_one();
    }

    fn set_interval(&self, interval: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.interval = interval;
    }

    fn interval(&self) -> Duration {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).interval
    }
}

/// Process-wide request cap across all domains
pub struct GlobalRateLimiter {
    limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl GlobalRateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(nonzero!(1u32));
        let quota = Quota::per_second(rps);
        Self {
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Wait until a request is allowed under the global quota
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}
