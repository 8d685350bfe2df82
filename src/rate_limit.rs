/// Rate limiting for the refresh path
///
/// `RateLimiter` is the seam; `TokenBucketLimiter` keeps one bucket per key in
/// a single process-local map. Buckets are not shared between instances.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Map size at which refilled buckets are swept out
const SWEEP_THRESHOLD: usize = 1024;
/// Any bucket refills completely within this window
const REFILL_WINDOW: Duration = Duration::from_secs(60);

pub trait RateLimiter: Send + Sync {
    /// Take one attempt for `key`; `false` once the key is over its budget
    fn allow(&self, key: &str) -> bool;
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full_at(now: Instant, capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: now,
        }
    }

    fn level_at(&self, now: Instant, capacity: u32, refill_per_second: f64) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * refill_per_second).min(capacity as f64)
    }

    fn try_take(&mut self, now: Instant, capacity: u32, refill_per_second: f64) -> bool {
        self.tokens = self.level_at(now, capacity, refill_per_second);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct Buckets {
    by_key: HashMap<String, TokenBucket>,
    /// Size that triggers the next sweep
    sweep_at: usize,
    last_sweep: Instant,
}

pub struct TokenBucketLimiter {
    capacity: u32,
    refill_per_second: f64,
    buckets: Mutex<Buckets>,
}

impl TokenBucketLimiter {
    /// Allows a burst of `attempts_per_minute`, refilled evenly over a minute
    pub fn per_minute(attempts_per_minute: u32) -> Self {
        Self {
            capacity: attempts_per_minute,
            refill_per_second: attempts_per_minute as f64 / 60.0,
            buckets: Mutex::new(Buckets {
                by_key: HashMap::new(),
                sweep_at: SWEEP_THRESHOLD,
                last_sweep: Instant::now(),
            }),
        }
    }

    fn allow_at(&self, key: &str, now: Instant) -> bool {
        // A poisoned map still holds valid buckets
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let (capacity, rate) = (self.capacity, self.refill_per_second);

        let tracked = buckets.by_key.len();
        let window_passed = now.saturating_duration_since(buckets.last_sweep) >= REFILL_WINDOW;
        if tracked >= buckets.sweep_at || (tracked >= SWEEP_THRESHOLD && window_passed) {
            // A full bucket is indistinguishable from a fresh one
            buckets
                .by_key
                .retain(|_, bucket| bucket.level_at(now, capacity, rate) < capacity as f64);
            buckets.sweep_at = SWEEP_THRESHOLD.max(buckets.by_key.len() * 2);
            buckets.last_sweep = now;
        }

        buckets
            .by_key
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::full_at(now, capacity))
            .try_take(now, capacity, rate)
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .by_key
            .len()
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }
}

/// Limiter that never refuses
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

impl RateLimiter for Unlimited {
    fn allow(&self, _key: &str) -> bool {
        true
    }
}
