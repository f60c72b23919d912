//! Token-bucket admission limiting.
//!
//! Buckets are refilled lazily on access; nothing runs in the background.
//! In per-key mode each client key gets its own bucket on first reference,
//! in global mode a single bucket is shared by every request.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::SocketAddr;

use crate::config::{LimiterScope, RateLimitConfig};
use crate::http::response::AppError;
use crate::observability::metrics;
use crate::security::headers::{client_key, RateLimitInfo};

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn refill(&mut self, capacity: f64, refill_rate: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        if now > self.last_update {
            self.last_update = now;
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        self.refill(capacity, refill_rate, now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn whole_tokens(&self) -> u64 {
        self.tokens.max(0.0).floor() as u64
    }
}

/// Result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub allowed: bool,
    /// Whole tokens left after this check.
    pub remaining: u64,
    /// Time until the next token is available. Zero when one already is.
    pub retry_after: Duration,
}

/// Token-bucket limiter keyed by client identity or a single global key.
pub struct AdmissionLimiter {
    scope: LimiterScope,
    capacity: f64,
    refill_rate: f64,
    buckets: DashMap<String, TokenBucket>,
    global: Mutex<TokenBucket>,
    idle_ttl: Option<Duration>,
    last_sweep: Mutex<Instant>,
}

impl AdmissionLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let now = Instant::now();
        let capacity = f64::from(config.capacity);
        Self {
            scope: config.scope,
            capacity,
            refill_rate: config.refill_per_second,
            buckets: DashMap::new(),
            global: Mutex::new(TokenBucket::new(capacity, now)),
            idle_ttl: config.idle_eviction_secs.map(Duration::from_secs),
            last_sweep: Mutex::new(now),
        }
    }

    /// Consume one token for `key`. Never blocks.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.check_at(key, Instant::now()).allowed
    }

    /// Whole tokens currently available to `key`.
    pub fn remaining(&self, key: &str) -> u64 {
        self.remaining_at(key, Instant::now())
    }

    /// Consume one token and report what is left, in one atomic step per key.
    pub fn check(&self, key: &str) -> Admission {
        self.check_at(key, Instant::now())
    }

    /// [`check`](Self::check) against an explicit clock reading.
    pub fn check_at(&self, key: &str, now: Instant) -> Admission {
        let (capacity, rate) = (self.capacity, self.refill_rate);
        let decide = |bucket: &mut TokenBucket| {
            let allowed = bucket.try_acquire(capacity, rate, now);
            let retry_after = if bucket.tokens >= 1.0 {
                Duration::ZERO
            } else {
                saturating_secs((1.0 - bucket.tokens) / rate)
            };
            Admission {
                allowed,
                remaining: bucket.whole_tokens(),
                retry_after,
            }
        };

        match self.scope {
            LimiterScope::Global => {
                let mut bucket = self
                    .global
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                decide(&mut bucket)
            }
            LimiterScope::PerKey => {
                self.maybe_sweep(now);
                let mut bucket = self
                    .buckets
                    .entry(key.to_string())
                    .or_insert_with(|| TokenBucket::new(capacity, now));
                decide(&mut bucket)
            }
        }
    }

    /// [`remaining`](Self::remaining) against an explicit clock reading.
    pub fn remaining_at(&self, key: &str, now: Instant) -> u64 {
        match self.scope {
            LimiterScope::Global => {
                let mut bucket = self
                    .global
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                bucket.refill(self.capacity, self.refill_rate, now);
                bucket.whole_tokens()
            }
            LimiterScope::PerKey => match self.buckets.get_mut(key) {
                Some(mut bucket) => {
                    bucket.refill(self.capacity, self.refill_rate, now);
                    bucket.whole_tokens()
                }
                // An unseen key would start with a full bucket.
                None => self.capacity as u64,
            },
        }
    }

    /// Drop per-key buckets that have been idle for at least `max_idle`.
    ///
    /// Returns the number of buckets removed.
    pub fn evict_idle_at(&self, now: Instant, max_idle: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_update) < max_idle);
        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.buckets.len(), "Evicted idle rate-limit buckets");
        }
        evicted
    }

    fn maybe_sweep(&self, now: Instant) {
        let Some(ttl) = self.idle_ttl else {
            return;
        };
        // Skip if another caller is sweeping.
        let Ok(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if now.saturating_duration_since(*last) < ttl {
            return;
        }
        *last = now;
        drop(last);
        self.evict_idle_at(now, ttl);
    }

    pub fn scope(&self) -> LimiterScope {
        self.scope
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// Time for an empty bucket to refill completely.
    pub fn window(&self) -> Duration {
        saturating_secs(self.capacity / self.refill_rate)
    }

    /// Window formatted for the `X-RateLimit-Window` header, e.g. `1s` or `2.5s`.
    pub fn window_description(&self) -> String {
        let secs = self.window().as_secs_f64();
        if (secs - secs.round()).abs() < 1e-9 {
            format!("{}s", secs.round() as u64)
        } else {
            format!("{:.1}s", secs)
        }
    }

    /// Number of live per-key buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn info(&self, remaining: u64) -> RateLimitInfo {
        RateLimitInfo {
            limit: self.capacity(),
            remaining,
            window: self.window_description(),
        }
    }
}

/// Seconds as a `Duration`, clamped to `Duration::MAX` for tiny refill rates.
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Middleware enforcing admission before any handler work starts.
pub async fn admission_middleware(
    State(limiter): State<Arc<AdmissionLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer);

    let admission = limiter.check(&key);
    let info = limiter.info(admission.remaining);

    if !admission.allowed {
        tracing::warn!(client = %key, scope = limiter.scope().as_str(), "Rate limit exceeded");
        metrics::record_rate_limited(limiter.scope().as_str());
        return AppError::RateLimited {
            info,
            retry_after: admission.retry_after,
        }
        .into_response();
    }

    let mut response = next.run(request).await;
    info.apply(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: u32, rate: f64, scope: LimiterScope) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            capacity,
            refill_per_second: rate,
            scope,
            idle_eviction_secs: None,
        }
    }

    #[test]
    fn five_per_second_denies_sixth_rapid_call() {
        let limiter = AdmissionLimiter::new(&config(5, 5.0, LimiterScope::PerKey));
        let start = Instant::now();
        let results: Vec<bool> = (0..6)
            .map(|i| limiter.check_at("client", start + Duration::from_millis(i * 15)).allowed)
            .collect();
        assert_eq!(results, vec![true, true, true, true, true, false]);
    }

    #[test]
    fn tiny_refill_rate_saturates_instead_of_panicking() {
        let limiter = AdmissionLimiter::new(&config(1, 1e-20, LimiterScope::PerKey));
        let now = Instant::now();
        assert!(limiter.check_at("client", now).allowed);
        let denied = limiter.check_at("client", now);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::MAX);
        assert_eq!(limiter.window(), Duration::MAX);
        assert!(limiter.window_description().ends_with('s'));
    }

    #[test]
    fn denial_leaves_bucket_unchanged() {
        let limiter = AdmissionLimiter::new(&config(1, 1.0, LimiterScope::PerKey));
        let t0 = Instant::now();
        assert!(limiter.check_at("k", t0).allowed);
        let denied = limiter.check_at("k", t0 + Duration::from_millis(500));
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        // Half a token was refilled and must still be there.
        assert!(limiter.check_at("k", t0 + Duration::from_millis(1000)).allowed);
    }

    #[test]
    fn never_over_admits_within_window() {
        let capacity = 4u32;
        let rate = 2.0;
        let limiter = AdmissionLimiter::new(&config(capacity, rate, LimiterScope::PerKey));
        let start = Instant::now();

        // One attempt every 10ms for 3 seconds.
        let admitted: Vec<Duration> = (0..300u64)
            .map(|i| Duration::from_millis(i * 10))
            .filter(|offset| limiter.check_at("k", start + *offset).allowed)
            .collect();

        for window_ms in [100u64, 500, 1000, 2500] {
            let window = Duration::from_millis(window_ms);
            let bound = f64::from(capacity) + rate * window.as_secs_f64();
            for (i, first) in admitted.iter().enumerate() {
                let in_window = admitted[i..]
                    .iter()
                    .take_while(|t| **t - *first <= window)
                    .count();
                assert!(
                    in_window as f64 <= bound + 1e-9,
                    "{} admissions in {:?} exceeds {}",
                    in_window,
                    window,
                    bound
                );
            }
        }
    }

    #[test]
    fn per_key_buckets_are_independent() {
        let limiter = AdmissionLimiter::new(&config(2, 1.0, LimiterScope::PerKey));
        let now = Instant::now();
        assert!(limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("a", now).allowed);
        assert!(!limiter.check_at("a", now).allowed);

        assert!(limiter.check_at("b", now).allowed);
        assert_eq!(limiter.remaining_at("b", now), 1);
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn global_scope_shares_one_bucket() {
        let limiter = AdmissionLimiter::new(&config(2, 1.0, LimiterScope::Global));
        let now = Instant::now();
        assert!(limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
        assert!(!limiter.check_at("c", now).allowed);
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn tokens_saturate_at_capacity() {
        let limiter = AdmissionLimiter::new(&config(3, 10.0, LimiterScope::PerKey));
        let now = Instant::now();
        assert!(limiter.check_at("k", now).allowed);
        assert_eq!(limiter.remaining_at("k", now + Duration::from_secs(60)), 3);
        assert_eq!(limiter.remaining("never-seen"), 3);
    }

    #[test]
    fn retry_after_reports_time_to_next_token() {
        let limiter = AdmissionLimiter::new(&config(1, 2.0, LimiterScope::PerKey));
        let now = Instant::now();
        assert!(limiter.check_at("k", now).allowed);
        let denied = limiter.check_at("k", now);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_millis(500));
    }

    #[test]
    fn concurrent_callers_cannot_share_last_token() {
        let limiter = Arc::new(AdmissionLimiter::new(&config(10, 0.001, LimiterScope::PerKey)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || (0..10).filter(|_| limiter.try_acquire("shared")).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
    }

    #[test]
    fn idle_buckets_are_evicted() {
        let mut cfg = config(2, 2.0, LimiterScope::PerKey);
        cfg.idle_eviction_secs = Some(5);
        let limiter = AdmissionLimiter::new(&cfg);
        let t0 = Instant::now();
        limiter.check_at("old", t0);
        limiter.check_at("fresh", t0 + Duration::from_secs(4));
        assert_eq!(limiter.bucket_count(), 2);

        // The sweep runs on access once the TTL has passed since the last one.
        limiter.check_at("new", t0 + Duration::from_secs(6));
        assert_eq!(limiter.bucket_count(), 2);
        assert_eq!(limiter.remaining_at("old", t0 + Duration::from_secs(6)), 2);
    }

    #[test]
    fn window_description_formats() {
        let limiter = AdmissionLimiter::new(&config(5, 5.0, LimiterScope::PerKey));
        assert_eq!(limiter.window_description(), "1s");
        let limiter = AdmissionLimiter::new(&config(5, 2.0, LimiterScope::PerKey));
        assert_eq!(limiter.window_description(), "2.5s");
    }
}
