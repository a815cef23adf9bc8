// src/enrich.rs
//! Source detail lookups, fronted by the TTL cache and the quota budget.

use std::sync::Arc;

use crate::cache::TtlCache;
use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::ingest::types::AdapterSet;
use crate::model::{Platform, PriorityTier, SourceDetails};
use crate::quota::QuotaSet;
use crate::store::Store;

pub type DetailsCache = TtlCache<(Platform, String), SourceDetails>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    /// `None` when the platform knows nothing about the account or the
    /// lookup was blocked.
    pub details: Option<SourceDetails>,
    /// The lookup was skipped because the quota budget is spent.
    pub degraded: bool,
}

pub struct SourceEnricher {
    store: Arc<Store>,
    adapters: AdapterSet,
    quotas: QuotaSet,
    cache: Arc<DetailsCache>,
    clock: SharedClock,
}

impl SourceEnricher {
    pub fn new(
        store: Arc<Store>,
        adapters: AdapterSet,
        cache: Arc<DetailsCache>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            adapters,
            quotas: QuotaSet::new(),
            cache,
            clock,
        }
    }

    pub fn with_quotas(mut self, quotas: QuotaSet) -> Self {
        self.quotas = quotas;
        self
    }

    /// Resolve display metadata for an account and register it as a
    /// Source. A cache hit skips the adapter call and the store write.
    pub async fn lookup(
        &self,
        platform: Platform,
        external_id: &str,
        tier: PriorityTier,
    ) -> Result<Enrichment> {
        let key = (platform, external_id.to_string());
        if let Some(details) = self.cache.get(&key) {
            return Ok(Enrichment {
                details: Some(details),
                degraded: false,
            });
        }

        let adapter = self
            .adapters
            .get(platform)
            .ok_or(Error::UnsupportedPlatform(platform))?;

        let charge = adapter.lookup_charge();
        let quota = self.quotas.get(platform);
        if let (Some(c), Some(q)) = (charge, quota) {
            if !q.can_use(u64::from(c.cost)) {
                tracing::warn!(
                    target: "enrich",
                    platform = %platform,
                    external_id,
                    "quota exhausted; enrichment degraded"
                );
                return Ok(Enrichment {
                    details: None,
                    degraded: true,
                });
            }
        }

        let found = adapter
            .lookup_source(external_id)
            .await
            .map_err(|e| Error::Adapter {
                platform,
                source: e,
            })?;
        if let (Some(c), Some(q)) = (charge, quota) {
            q.record_usage(c.endpoint, u64::from(c.cost));
        }

        let Some(details) = found else {
            return Ok(Enrichment {
                details: None,
                degraded: false,
            });
        };
        self.store.upsert_source(&details, self.clock.now())?;
        self.cache.set_with_tier(key, details.clone(), tier);
        tracing::info!(
            target: "enrich",
            platform = %platform,
            external_id,
            name = details.display_name.as_deref().unwrap_or_default(),
            "source enriched"
        );
        Ok(Enrichment {
            details: Some(details),
            degraded: false,
        })
    }
}
