// src/reconcile.rs
//! Live-state reconciliation: close live rows the platform no longer
//! reports as live.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::error::Result;
use crate::ingest::types::{AdapterSet, SourceRef};
use crate::model::{SourceId, StoredEvent};
use crate::quota::QuotaSet;
use crate::store::Store;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("reconcile_closed_total", "Live rows closed by reconciliation.");
        describe_counter!(
            "reconcile_account_errors_total",
            "Accounts whose liveness query failed."
        );
    });
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Open live rows examined.
    pub checked: usize,
    /// Rows turned into recordings.
    pub closed: usize,
    /// Accounts whose liveness query failed or was quota-blocked; their
    /// rows are left open for the next run.
    pub failed_accounts: usize,
}

pub struct LiveReconciler {
    store: Arc<Store>,
    adapters: AdapterSet,
    quotas: QuotaSet,
    clock: SharedClock,
}

impl LiveReconciler {
    pub fn new(store: Arc<Store>, adapters: AdapterSet, clock: SharedClock) -> Self {
        Self {
            store,
            adapters,
            quotas: QuotaSet::new(),
            clock,
        }
    }

    pub fn with_quotas(mut self, quotas: QuotaSet) -> Self {
        self.quotas = quotas;
        self
    }

    /// One liveness query per account owning an open live row; rows absent
    /// from the answer are closed at the observation time.
    pub async fn reconcile(&self, cancel: CancellationToken) -> Result<ReconcileReport> {
        ensure_metrics_described();
        let mut report = ReconcileReport::default();

        for platform in self.adapters.platforms() {
            let Some(adapter) = self.adapters.get(platform) else {
                continue;
            };
            if !adapter.supports_liveness() {
                continue;
            }

            let open = self.store.open_live_events_for(platform, self.clock.now())?;
            let observed_at = self.clock.now();
            report.checked += open.len();

            let mut by_source: BTreeMap<SourceId, Vec<StoredEvent>> = BTreeMap::new();
            for ev in open {
                by_source.entry(ev.event.source_id).or_default().push(ev);
            }

            for (source_id, events) in by_source {
                if cancel.is_cancelled() {
                    tracing::warn!(target: "reconcile", "reconciliation cancelled");
                    return Ok(report);
                }
                let Some(source) = self.store.get_source(source_id)? else {
                    continue;
                };
                let account = SourceRef::from(&source);

                let charge = adapter.liveness_charge();
                let quota = self.quotas.get(platform);
                if let (Some(c), Some(q)) = (charge, quota) {
                    if !q.can_use(u64::from(c.cost)) {
                        tracing::info!(target: "reconcile", account = %account.external_id, "quota exhausted; account skipped");
                        report.failed_accounts += 1;
                        continue;
                    }
                }

                let live_now = match adapter.current_live_state(&account).await {
                    Ok(ids) => ids,
                    Err(e) => {
                        tracing::warn!(
                            target: "reconcile",
                            error = ?e,
                            account = %account.external_id,
                            provider = adapter.name(),
                            "liveness query failed; account skipped"
                        );
                        counter!("reconcile_account_errors_total").increment(1);
                        report.failed_accounts += 1;
                        continue;
                    }
                };
                if let (Some(c), Some(q)) = (charge, quota) {
                    q.record_usage(c.endpoint, u64::from(c.cost));
                }

                let still_live: HashSet<String> = live_now.into_iter().collect();
                for ev in events {
                    if still_live.contains(&ev.event.external_id) {
                        continue;
                    }
                    if self.store.close_live_event(ev.id, observed_at)? {
                        report.closed += 1;
                        counter!("reconcile_closed_total").increment(1);
                        tracing::info!(
                            target: "reconcile",
                            event_id = ev.id,
                            title = %ev.event.title,
                            "live ended; row closed"
                        );
                    }
                }
            }
        }

        self.quotas.flush_all().await;
        tracing::info!(
            target: "reconcile",
            checked = report.checked,
            closed = report.closed,
            failed_accounts = report.failed_accounts,
            "reconciliation finished"
        );
        Ok(report)
    }
}
