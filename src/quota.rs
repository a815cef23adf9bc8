// src/quota.rs
//! Daily API unit accounting for metered platforms.
//!
//! The in-memory counter is authoritative for admission decisions and is
//! updated lock-free. Usage rows are written to the [`QuotaLedger`] by a
//! background flusher so callers never wait on storage. On start the
//! counter is rehydrated from the ledger for the current day.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use metrics::gauge;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};

use crate::clock::SharedClock;
use crate::error::Result;
use crate::model::Platform;
use crate::store::QuotaLedger;

/// Warning thresholds, percent of the daily limit.
const WARN_LEVELS: [u64; 2] = [75, 90];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub daily_limit: u64,
    /// Minutes east of UTC at which the platform's quota day starts.
    pub reset_offset_minutes: i32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: 10_000,
            reset_offset_minutes: 0,
        }
    }
}

enum LedgerMsg {
    Usage {
        date: String,
        endpoint: &'static str,
        cost: u64,
    },
    Flush(oneshot::Sender<()>),
}

pub struct QuotaTracker {
    platform: Platform,
    limit: u64,
    offset: Duration,
    clock: SharedClock,
    used: AtomicU64,
    day: Mutex<NaiveDate>,
    tx: mpsc::UnboundedSender<LedgerMsg>,
}

impl QuotaTracker {
    /// Rehydrate today's usage and spawn the ledger flusher. Must be called
    /// inside a tokio runtime.
    pub fn start(
        platform: Platform,
        cfg: QuotaConfig,
        ledger: Arc<dyn QuotaLedger>,
        clock: SharedClock,
    ) -> Result<Arc<Self>> {
        let offset = Duration::minutes(i64::from(cfg.reset_offset_minutes));
        let today = (clock.now() + offset).date_naive();
        let used = ledger.daily_total(platform, &day_key(today))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_flusher(platform, ledger, rx));

        let tracker = Arc::new(Self {
            platform,
            limit: cfg.daily_limit.max(1),
            offset,
            clock,
            used: AtomicU64::new(used),
            day: Mutex::new(today),
            tx,
        });
        tracing::info!(
            target: "quota",
            platform = %platform,
            used,
            limit = tracker.limit,
            percent = tracker.usage_percent(),
            "quota tracker started"
        );
        gauge!("quota_used_units", "platform" => platform.as_str()).set(used as f64);
        Ok(tracker)
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Whether `cost` more units fit into today's budget.
    pub fn can_use(&self, cost: u64) -> bool {
        self.roll_day();
        self.used.load(Ordering::SeqCst).saturating_add(cost) <= self.limit
    }

    /// Account `cost` units against today's budget and queue the ledger row.
    pub fn record_usage(&self, endpoint: &'static str, cost: u64) {
        let date = day_key(self.roll_day());
        let prev = self.used.fetch_add(cost, Ordering::SeqCst);
        let now_used = prev.saturating_add(cost);

        for level in WARN_LEVELS {
            let mark = self.limit.saturating_mul(level);
            if prev.saturating_mul(100) < mark && now_used.saturating_mul(100) >= mark {
                tracing::warn!(
                    target: "quota",
                    platform = %self.platform,
                    used = now_used,
                    limit = self.limit,
                    level,
                    "quota usage crossed warning level"
                );
            }
        }
        gauge!("quota_used_units", "platform" => self.platform.as_str()).set(now_used as f64);

        if self
            .tx
            .send(LedgerMsg::Usage {
                date,
                endpoint,
                cost,
            })
            .is_err()
        {
            tracing::warn!(target: "quota", platform = %self.platform, endpoint, "quota flusher gone; usage row dropped");
        }
    }

    pub fn used(&self) -> u64 {
        self.roll_day();
        self.used.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used())
    }

    pub fn usage_percent(&self) -> f64 {
        self.used() as f64 / self.limit as f64 * 100.0
    }

    /// Wait until every queued usage row has been handed to the ledger.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(LedgerMsg::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Reset the counter when the quota day changed; returns today.
    fn roll_day(&self) -> NaiveDate {
        let today = (self.clock.now() + self.offset).date_naive();
        let mut day = self.day.lock();
        if *day != today {
            *day = today;
            self.used.store(0, Ordering::SeqCst);
            tracing::info!(target: "quota", platform = %self.platform, day = %today, "quota day rolled over");
            gauge!("quota_used_units", "platform" => self.platform.as_str()).set(0.0);
        }
        today
    }
}

async fn run_flusher(
    platform: Platform,
    ledger: Arc<dyn QuotaLedger>,
    mut rx: mpsc::UnboundedReceiver<LedgerMsg>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            LedgerMsg::Usage {
                date,
                endpoint,
                cost,
            } => {
                if let Err(e) = ledger.add_usage(&date, platform, endpoint, cost) {
                    tracing::warn!(target: "quota", error = ?e, platform = %platform, endpoint, "failed to persist quota usage");
                }
            }
            LedgerMsg::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

fn day_key(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// Trackers for every metered platform.
#[derive(Clone, Default)]
pub struct QuotaSet {
    inner: HashMap<Platform, Arc<QuotaTracker>>,
}

impl QuotaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tracker: Arc<QuotaTracker>) -> Self {
        self.inner.insert(tracker.platform(), tracker);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<&Arc<QuotaTracker>> {
        self.inner.get(&platform)
    }

    pub async fn flush_all(&self) {
        for t in self.inner.values() {
            t.flush().await;
        }
    }
}
