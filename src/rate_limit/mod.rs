//! Per-client, per-method rate limiting.
//!
//! Every (client identity, method) pair with a configured limit gets its
//! own continuous-refill [`TokenBucket`], held in a [`LimiterRegistry`].
//! Buckets replenish lazily at check time; there is no refill task. Stale
//! buckets are pruned via [`LimiterRegistry::retain_active`], which should
//! be called from a background task to bound memory under
//! high-cardinality traffic.

mod bucket;
mod registry;

pub use bucket::{RateLimitParams, TokenBucket};
pub use registry::{BucketKey, LimiterRegistry};
