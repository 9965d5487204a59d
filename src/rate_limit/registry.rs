use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::{RateLimitParams, TokenBucket};

/// Identifies one independent bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub identity: IpAddr,
    pub method: String,
}

/// Concurrent map from (client identity, method) to its bucket.
///
/// Creation is lazy and happens exactly once per key: racing first
/// requests resolve through the shard's entry lock and all observe the
/// same `Arc`. Lookups of existing keys only take a shard read lock and
/// release it before the bucket's own lock is taken. Only the sweep in
/// [`LimiterRegistry::retain_active`] locks a bucket under a shard lock.
#[derive(Debug, Default)]
pub struct LimiterRegistry {
    buckets: DashMap<BucketKey, Arc<TokenBucket>>,
}

impl LimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bucket for `(identity, method)`, creating a fully
    /// charged one on first use.
    ///
    /// An existing bucket is retuned to `params` if they changed since it
    /// was created, so configuration reloads reach live clients.
    pub fn get_or_create(
        &self,
        identity: IpAddr,
        method: &str,
        params: RateLimitParams,
    ) -> Arc<TokenBucket> {
        let key = BucketKey {
            identity,
            method: method.to_owned(),
        };

        let existing = self.buckets.get(&key).map(|entry| Arc::clone(entry.value()));
        if let Some(bucket) = existing {
            bucket.retune(params);
            return bucket;
        }

        let bucket = Arc::clone(
            self.buckets
                .entry(key)
                .or_insert_with(|| Arc::new(TokenBucket::new(params)))
                .value(),
        );
        bucket.retune(params);
        bucket
    }

    /// Removes buckets idle for at least `idle_ttl` that have fully
    /// replenished. Returns the number of buckets removed.
    ///
    /// A bucket still held by an in-flight request is kept. Its `Arc` was
    /// cloned under the shard lock, which the sweep holds exclusively.
    pub fn retain_active(&self, now: Instant, idle_ttl: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            Arc::strong_count(bucket) > 1 || !bucket.is_idle(now, idle_ttl)
        });
        before.saturating_sub(self.buckets.len())
    }

    /// Returns the number of (identity, method) pairs currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.buckets.len()
    }
}
