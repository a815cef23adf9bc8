// src/cache.rs
//! In-process TTL cache with absolute expiry and tier-derived TTLs.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::model::PriorityTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub high_ttl_secs: i64,
    pub medium_ttl_secs: i64,
    pub low_ttl_secs: i64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            high_ttl_secs: 3600,
            medium_ttl_secs: 3 * 3600,
            low_ttl_secs: 6 * 3600,
            sweep_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, tier: PriorityTier) -> Duration {
        let secs = match tier {
            PriorityTier::High => self.high_ttl_secs,
            PriorityTier::Medium => self.medium_ttl_secs,
            PriorityTier::Low => self.low_ttl_secs,
        };
        Duration::seconds(secs.max(1))
    }

    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        if self.high_ttl_secs <= 0 {
            self.high_ttl_secs = d.high_ttl_secs;
        }
        if self.medium_ttl_secs <= 0 {
            self.medium_ttl_secs = d.medium_ttl_secs;
        }
        if self.low_ttl_secs <= 0 {
            self.low_ttl_secs = d.low_ttl_secs;
        }
        if self.sweep_interval_secs == 0 {
            self.sweep_interval_secs = d.sweep_interval_secs;
        }
        self
    }
}

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Expired entries are never returned; they are physically removed by
/// [`purge_expired`](TtlCache::purge_expired) or the sweeper.
pub struct TtlCache<K, V> {
    cfg: CacheConfig,
    clock: SharedClock,
    items: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(cfg: CacheConfig, clock: SharedClock) -> Self {
        Self {
            cfg: cfg.sanitized(),
            clock,
            items: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let items = self.items.read();
        match items.get(key) {
            Some(e) if e.expires_at > now => {
                counter!("cache_hits_total").increment(1);
                Some(e.value.clone())
            }
            _ => {
                counter!("cache_misses_total").increment(1);
                None
            }
        }
    }

    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let expires_at = self.clock.now() + ttl;
        self.items.write().insert(key, Entry { value, expires_at });
    }

    pub fn set_with_tier(&self, key: K, value: V, tier: PriorityTier) {
        self.set(key, value, self.cfg.ttl_for(tier));
    }

    pub fn delete(&self, key: &K) {
        self.items.write().remove(key);
    }

    pub fn clear(&self) {
        self.items.write().clear();
    }

    /// Entries held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|_, e| e.expires_at > now);
        before - items.len()
    }

    /// Periodically purge expired entries until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let every = std::time::Duration::from_secs(cache.cfg.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let n = cache.purge_expired();
                        if n > 0 {
                            tracing::debug!(target: "cache", purged = n, "expired entries swept");
                        }
                    }
                }
            }
        })
    }
}
