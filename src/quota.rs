//! Quota gate: pre-flight check of a metered credit balance before
//! expensive generation.
//!
//! Balances come from the external metering service and are cached for
//! a short TTL with request de-duplication — concurrent callers for
//! the same account share a single in-flight fetch. A check only
//! *plans* consumption; nothing is deducted until [`QuotaGate::commit`]
//! runs after a successful external generation, so a failed generation
//! never burns quota and an unconsumed reservation is released by
//! simply dropping it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::collab::{CreditKind, CreditPool, QuotaService};

/// Outcome of a pre-flight quota check.
#[derive(Debug, Clone)]
pub enum QuotaDecision {
    Allowed(QuotaReservation),
    Denied(String),
}

/// A planned, not-yet-finalized consumption across credit pools.
/// Serializable so a suspended pipeline run can carry it across an
/// approval round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaReservation {
    pub account_id: String,
    pub kind: CreditKind,
    /// `(pool_id, amount)` in pool priority order. Empty for the free
    /// tier (no quota product purchased for this kind).
    pub deductions: Vec<(String, f64)>,
}

struct CachedBalances {
    fetched_at: Instant,
    pools: Vec<CreditPool>,
}

pub struct QuotaGate {
    service: Arc<dyn QuotaService>,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedBalances>>,
    fetch_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl QuotaGate {
    pub fn new(service: Arc<dyn QuotaService>, ttl_secs: u64) -> Self {
        Self {
            service,
            ttl: Duration::from_secs(ttl_secs),
            cache: Mutex::new(HashMap::new()),
            fetch_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether `amount` credits of `kind` are available and plan
    /// how to take them.
    ///
    /// Free-tier rule: if no pool of this kind was ever purchased, the
    /// gate allows unconditionally — enforcement only activates once
    /// an add-on exists. Otherwise the amount is split across the
    /// account's pools in priority order; only when all pools together
    /// cannot cover it is the request denied.
    pub async fn check_and_reserve(
        &self,
        account_id: &str,
        kind: CreditKind,
        amount: f64,
    ) -> Result<QuotaDecision> {
        let pools: Vec<CreditPool> = self
            .balances(account_id)
            .await?
            .into_iter()
            .filter(|p| p.kind == kind)
            .collect();

        if !pools.iter().any(|p| p.purchased) {
            debug!(account_id, kind = kind.as_str(), "no quota product purchased, allowing");
            return Ok(QuotaDecision::Allowed(QuotaReservation {
                account_id: account_id.to_string(),
                kind,
                deductions: Vec::new(),
            }));
        }

        let mut remaining = amount;
        let mut deductions = Vec::new();
        for pool in &pools {
            if remaining <= 0.0 {
                break;
            }
            let take = remaining.min(pool.balance.max(0.0));
            if take > 0.0 {
                deductions.push((pool.id.clone(), take));
                remaining -= take;
            }
        }

        if remaining > 0.0 {
            let total: f64 = pools.iter().map(|p| p.balance.max(0.0)).sum();
            return Ok(QuotaDecision::Denied(format!(
                "Insufficient {} credits: {:.0} required, {:.0} available.",
                kind.as_str(),
                amount,
                total
            )));
        }

        Ok(QuotaDecision::Allowed(QuotaReservation {
            account_id: account_id.to_string(),
            kind,
            deductions,
        }))
    }

    /// Finalize a reservation after a successful external generation.
    pub async fn commit(&self, reservation: &QuotaReservation) -> Result<()> {
        for (pool_id, amount) in &reservation.deductions {
            self.service
                .consume(&reservation.account_id, pool_id, *amount)
                .await?;
        }
        if !reservation.deductions.is_empty() {
            self.cache.lock().await.remove(&reservation.account_id);
        }
        Ok(())
    }

    async fn balances(&self, account_id: &str) -> Result<Vec<CreditPool>> {
        if let Some(pools) = self.cached(account_id).await {
            return Ok(pools);
        }

        // One in-flight fetch per account: later callers block on the
        // per-account lock, then find the cache warm. The map entry is
        // pruned once the fetch settles so the map never outgrows the
        // set of accounts currently fetching; waiters keep their Arc
        // clone, so pruning never invalidates a held lock.
        let fetch_lock = {
            let mut locks = self.fetch_locks.lock().await;
            locks
                .entry(account_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = fetch_lock.lock().await;

        if let Some(pools) = self.cached(account_id).await {
            drop(guard);
            self.fetch_locks.lock().await.remove(account_id);
            return Ok(pools);
        }

        let fetched = self.service.fetch_balances(account_id).await;
        if let Ok(pools) = &fetched {
            self.cache.lock().await.insert(
                account_id.to_string(),
                CachedBalances {
                    fetched_at: Instant::now(),
                    pools: pools.clone(),
                },
            );
        }
        drop(guard);
        self.fetch_locks.lock().await.remove(account_id);
        fetched
    }

    #[cfg(test)]
    async fn fetch_lock_count(&self) -> usize {
        self.fetch_locks.lock().await.len()
    }

    async fn cached(&self, account_id: &str) -> Option<Vec<CreditPool>> {
        let cache = self.cache.lock().await;
        cache.get(account_id).and_then(|entry| {
            if entry.fetched_at.elapsed() < self.ttl {
                Some(entry.pools.clone())
            } else {
                None
            }
        })
    }
}
