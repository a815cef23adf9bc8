// src/ingest/scheduler.rs
//! Popularity tiers, due-source selection and the periodic ingest loop.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ingest::Orchestrator;
use crate::model::{PriorityTier, Source};
use crate::store::SourcePopularity;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Subscriber share (0..=1) at or above which a source is High.
    pub high_share: f64,
    /// Subscriber share at or above which a source is Medium.
    pub medium_share: f64,
    pub high_interval_mins: i64,
    pub medium_interval_mins: i64,
    pub low_interval_mins: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            high_share: 0.10,
            medium_share: 0.01,
            high_interval_mins: 15,
            medium_interval_mins: 60,
            low_interval_mins: 180,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self, tier: PriorityTier) -> Duration {
        let mins = match tier {
            PriorityTier::High => self.high_interval_mins,
            PriorityTier::Medium => self.medium_interval_mins,
            PriorityTier::Low => self.low_interval_mins,
        };
        Duration::minutes(mins)
    }

    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        if !(0.0..=1.0).contains(&self.high_share) {
            self.high_share = d.high_share;
        }
        if !(0.0..=1.0).contains(&self.medium_share) || self.medium_share > self.high_share {
            self.medium_share = d.medium_share.min(self.high_share);
        }
        if self.high_interval_mins <= 0 {
            self.high_interval_mins = d.high_interval_mins;
        }
        if self.medium_interval_mins <= 0 {
            self.medium_interval_mins = d.medium_interval_mins;
        }
        if self.low_interval_mins <= 0 {
            self.low_interval_mins = d.low_interval_mins;
        }
        self
    }

    pub fn tier_for(&self, subscribers: u64, total_users: u64) -> PriorityTier {
        if total_users == 0 {
            return PriorityTier::Low;
        }
        let share = subscribers as f64 / total_users as f64;
        if share >= self.high_share {
            PriorityTier::High
        } else if share >= self.medium_share {
            PriorityTier::Medium
        } else {
            PriorityTier::Low
        }
    }
}

/// A source picked for this run, with the tier that made it due.
#[derive(Debug, Clone)]
pub struct DueSource {
    pub source: Source,
    pub tier: PriorityTier,
}

/// Sources with at least one enabled subscriber whose watermark is missing
/// or older than their tier's refresh interval. Most stale first.
pub fn select_due(
    sources: Vec<SourcePopularity>,
    total_users: u64,
    now: DateTime<Utc>,
    cfg: &ScheduleConfig,
) -> Vec<DueSource> {
    let mut due: Vec<DueSource> = sources
        .into_iter()
        .filter(|p| p.subscribers > 0)
        .filter_map(|p| {
            let tier = cfg.tier_for(p.subscribers, total_users);
            let is_due = match p.source.last_fetched_at {
                None => true,
                Some(last) => now - last >= cfg.interval(tier),
            };
            is_due.then_some(DueSource {
                source: p.source,
                tier,
            })
        })
        .collect();
    // never-fetched first, then oldest watermark, then id
    due.sort_by(|a, b| {
        a.source
            .last_fetched_at
            .cmp(&b.source.last_fetched_at)
            .then(a.source.id.cmp(&b.source.id))
    });
    due
}

#[derive(Clone, Copy, Debug)]
pub struct IngestSchedulerCfg {
    pub interval_secs: u64,
}

/// Run `run_due_batch` on a fixed cadence until `cancel` fires. A fatal
/// batch error is logged and the loop keeps ticking.
pub fn spawn_scheduler(
    orch: Arc<Orchestrator>,
    cfg: IngestSchedulerCfg,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(cfg.interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            counter!("ingest_runs_total").increment(1);
            match orch.run_due_batch(cancel.child_token()).await {
                Ok(res) => tracing::info!(
                    target: "ingest",
                    succeeded = res.succeeded,
                    failed = res.failed,
                    skipped = res.skipped,
                    upserted = res.events_upserted,
                    "scheduled ingest tick"
                ),
                Err(e) => tracing::error!(target: "ingest", error = ?e, "scheduled ingest aborted"),
            }
        }
    })
}
