//! Admission policy snapshots and their hot-reload.
//!
//! A [`Policy`] is an immutable value. The [`PolicyStore`] holds the
//! current one behind an [`ArcSwap`], so readers take a cheap `Arc` clone
//! and never observe a half-applied update. A single background task owns
//! the write side: it re-reads the config file on a fixed interval and
//! swaps in the new snapshot, keeping the last-known-good one on any error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use crate::rate_limit::RateLimitParams;
use crate::{Config, Result};

/// Wei per gwei.
const GWEI: u64 = 1_000_000_000;

/// Point-in-time admission configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    /// Endpoint accepted requests are forwarded to.
    pub upstream: hyper::Uri,
    /// Gas-price floor for raw transactions, in gwei.
    pub min_gas_price_gwei: u64,
    /// Widest accepted `eth_getLogs` block span.
    pub max_log_block_range: u64,
    /// Per-method rate limits. Absent methods are unthrottled.
    pub rate_limits: HashMap<String, RateLimitParams>,
    /// Reject undecodable payloads instead of letting them through.
    pub strict_decoding: bool,
}

impl Policy {
    /// The gas-price floor converted to wei.
    pub fn min_gas_price_wei(&self) -> U256 {
        U256::from(self.min_gas_price_gwei) * U256::from(GWEI)
    }

    pub fn rate_limit_for(&self, method: &str) -> Option<RateLimitParams> {
        self.rate_limits.get(method).copied()
    }
}

/// Shared holder of the current [`Policy`].
#[derive(Debug)]
pub struct PolicyStore {
    current: ArcSwap<Policy>,
}

impl PolicyStore {
    pub fn new(policy: Policy) -> Self {
        Self {
            current: ArcSwap::from_pointee(policy),
        }
    }

    /// Returns the current snapshot. The returned value is never mutated.
    pub fn snapshot(&self) -> Arc<Policy> {
        self.current.load_full()
    }

    /// Atomically replaces the current snapshot.
    pub fn replace(&self, policy: Policy) {
        self.current.store(Arc::new(policy));
    }

    /// Re-reads `path` and swaps in the resulting policy.
    ///
    /// On error the current snapshot is left untouched and the error is
    /// returned. Returns `Ok(true)` if the policy changed.
    pub fn reload_from(&self, path: &std::path::Path) -> Result<bool> {
        let policy = Config::load_from_file(path)?.to_policy()?;
        if *self.current.load_full() == policy {
            return Ok(false);
        }
        self.replace(policy);
        Ok(true)
    }
}

/// Spawns the single task that refreshes `store` from `path` every
/// `interval`. Malformed files are logged and skipped.
pub fn spawn_policy_refresher(
    store: Arc<PolicyStore>,
    path: PathBuf,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately and the startup load already happened.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let reload_path = path.clone();
            let reload_store = Arc::clone(&store);
            let outcome =
                tokio::task::spawn_blocking(move || reload_store.reload_from(&reload_path)).await;

            match outcome {
                Ok(Ok(true)) => info!(path = %path.display(), "policy reloaded"),
                Ok(Ok(false)) => debug!(path = %path.display(), "policy unchanged"),
                Ok(Err(e)) => warn!(
                    path = %path.display(),
                    error = %e,
                    "policy reload failed, keeping last-known-good policy"
                ),
                Err(e) => warn!(error = %e, "policy reload task failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(upstream: &str, gwei: u64) -> Policy {
        Policy {
            upstream: upstream.parse().unwrap(),
            min_gas_price_gwei: gwei,
            max_log_block_range: 1000,
            rate_limits: HashMap::new(),
            strict_decoding: false,
        }
    }

    fn write_config(file: &tempfile::NamedTempFile, contents: &str) {
        std::fs::write(file.path(), contents).unwrap();
    }

    #[test]
    fn min_gas_price_is_converted_to_wei() {
        let p = policy("http://localhost:8545", 3);
        assert_eq!(p.min_gas_price_wei(), U256::from(3_000_000_000u64));
    }

    #[test]
    fn min_gas_price_does_not_overflow() {
        let p = policy("http://localhost:8545", u64::MAX);
        assert_eq!(
            p.min_gas_price_wei(),
            U256::from(u64::MAX) * U256::from(1_000_000_000u64)
        );
    }

    #[test]
    fn snapshot_survives_replace() {
        let store = PolicyStore::new(policy("http://a:8545", 1));
        let before = store.snapshot();
        store.replace(policy("http://b:8545", 2));

        assert_eq!(before.min_gas_price_gwei, 1);
        assert_eq!(store.snapshot().min_gas_price_gwei, 2);
    }

    #[test]
    fn reload_swaps_in_new_policy() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(
            &file,
            "upstream: http://localhost:8545\nmin_gas_price_gwei: 7\n",
        );

        let store = PolicyStore::new(policy("http://localhost:8545", 1));
        assert!(store.reload_from(file.path()).unwrap());
        assert_eq!(store.snapshot().min_gas_price_gwei, 7);
        assert!(!store.reload_from(file.path()).unwrap());
    }

    #[test]
    fn malformed_reload_keeps_last_known_good() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(&file, "upstream: [this is: not valid");

        let store = PolicyStore::new(policy("http://localhost:8545", 4));
        assert!(store.reload_from(file.path()).is_err());
        assert_eq!(store.snapshot().min_gas_price_gwei, 4);

        write_config(&file, "min_gas_price_gwei: 9\n");
        assert!(store.reload_from(file.path()).is_err(), "missing upstream");
        assert_eq!(store.snapshot().min_gas_price_gwei, 4);
    }

    #[test]
    fn missing_file_keeps_last_known_good() {
        let store = PolicyStore::new(policy("http://localhost:8545", 4));
        assert!(store.reload_from(std::path::Path::new("/nonexistent/rpc-guard.yml")).is_err());
        assert_eq!(store.snapshot().min_gas_price_gwei, 4);
    }

    #[tokio::test]
    async fn refresher_applies_file_changes() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(
            &file,
            "upstream: http://localhost:8545\nmin_gas_price_gwei: 5\n",
        );

        let store = Arc::new(PolicyStore::new(policy("http://localhost:8545", 1)));
        let handle = spawn_policy_refresher(
            Arc::clone(&store),
            file.path().to_path_buf(),
            Duration::from_millis(20),
        );

        for _ in 0..100 {
            if store.snapshot().min_gas_price_gwei == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();
        assert_eq!(store.snapshot().min_gas_price_gwei, 5);
    }
}
