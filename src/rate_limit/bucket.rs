use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Sustained rate and burst capacity for one method.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitParams {
    /// Tokens added per second.
    pub rate: f64,
    /// Maximum tokens held at once.
    pub burst: f64,
}

/// A continuous-refill token bucket.
///
/// Tokens are replenished from the elapsed time on each check, so the only
/// shared state is the token count and the last refill instant. The lock
/// is held for the arithmetic alone.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    params: RateLimitParams,
}

impl BucketState {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.params.rate).min(self.params.burst);
        self.last_refill = self.last_refill.max(now);
    }
}

impl TokenBucket {
    /// Creates a fully charged bucket.
    pub fn new(params: RateLimitParams) -> Self {
        Self::new_at(params, Instant::now())
    }

    pub fn new_at(params: RateLimitParams, now: Instant) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: params.burst,
                last_refill: now,
                params,
            }),
        }
    }

    /// Takes one token if available.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Takes one token if available, treating `now` as the current time.
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        state.refill(now);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Adopts new parameters, keeping the accumulated tokens up to the new
    /// burst. Tokens earned before the change are credited at the old rate.
    pub fn retune(&self, params: RateLimitParams) {
        self.retune_at(params, Instant::now());
    }

    pub fn retune_at(&self, params: RateLimitParams, now: Instant) {
        let mut state = self.state.lock();
        if state.params == params {
            return;
        }
        state.refill(now);
        state.params = params;
        state.tokens = state.tokens.min(params.burst);
    }

    /// Returns `true` if the bucket has not been touched for `ttl` and
    /// would be full at `now`, meaning dropping it loses no state.
    pub fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        let state = self.state.lock();
        let idle_for = now.saturating_duration_since(state.last_refill);
        if idle_for < ttl {
            return false;
        }
        let projected = state.tokens + idle_for.as_secs_f64() * state.params.rate;
        projected >= state.params.burst
    }

    pub fn params(&self) -> RateLimitParams {
        self.state.lock().params
    }
}
