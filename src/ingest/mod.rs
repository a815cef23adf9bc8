// src/ingest/mod.rs
pub mod dedup;
pub mod normalize;
pub mod providers;
pub mod scheduler;
pub mod types;
pub mod watermark;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::ingest::dedup::{LiveMarker, ShadowFilter, ShadowPolicy};
use crate::ingest::normalize::normalize;
use crate::ingest::scheduler::ScheduleConfig;
use crate::ingest::types::{AdapterSet, SourceRef};
use crate::ingest::watermark::{fetch_since, FetchPolicy};
use crate::model::{EventKind, Platform, Source};
use crate::quota::QuotaSet;
use crate::store::Store;

pub use crate::ingest::normalize::normalize_text;

/// One-time metrics registration (so series show up in the exposition).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_sources_succeeded_total",
            "Sources fetched and fully persisted."
        );
        describe_counter!(
            "ingest_sources_failed_total",
            "Sources whose fetch failed or had no adapter."
        );
        describe_counter!(
            "ingest_sources_skipped_total",
            "Sources skipped because the platform quota was exhausted."
        );
        describe_counter!("ingest_events_upserted_total", "Events written.");
        describe_counter!(
            "ingest_events_suppressed_total",
            "Recorded items suppressed as shadows of a live item."
        );
        describe_counter!(
            "ingest_items_rejected_total",
            "Raw items that failed normalization."
        );
        describe_histogram!("ingest_fetch_ms", "Adapter fetch time in milliseconds.");
        describe_gauge!(
            "ingest_batch_last_run_ts",
            "Unix ts when an ingest batch last finished."
        );
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Sources processed concurrently.
    pub max_concurrency: usize,
    /// Backward slack subtracted from the watermark.
    pub lookback_slack_secs: i64,
    /// Whole-run deadline; 0 = none.
    pub run_deadline_secs: u64,
    /// Upper bound on sources picked by one due-batch.
    pub max_sources: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            lookback_slack_secs: 300,
            run_deadline_secs: 0,
            max_sources: 1000,
        }
    }
}

impl IngestConfig {
    pub fn sanitized(mut self) -> Self {
        self.max_concurrency = self.max_concurrency.clamp(1, 256);
        if self.lookback_slack_secs < 0 {
            self.lookback_slack_secs = 0;
        }
        if self.max_sources == 0 {
            self.max_sources = Self::default().max_sources;
        }
        self
    }
}

/// Aggregate outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Quota-blocked sources. Their watermark is untouched.
    pub skipped: usize,
    pub events_upserted: usize,
    pub events_suppressed: usize,
    pub items_rejected: usize,
    /// The run was cancelled or hit its deadline before every source ran.
    pub cancelled: bool,
}

impl BatchResult {
    fn absorb(&mut self, other: &BatchResult) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.events_upserted += other.events_upserted;
        self.events_suppressed += other.events_suppressed;
        self.items_rejected += other.items_rejected;
        self.cancelled |= other.cancelled;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceOutcome {
    Ingested {
        upserted: usize,
        suppressed: usize,
        rejected: usize,
    },
    Skipped,
    Failed,
}

pub struct Orchestrator {
    store: Arc<Store>,
    adapters: AdapterSet,
    quotas: QuotaSet,
    policies: HashMap<Platform, FetchPolicy>,
    cfg: IngestConfig,
    schedule: ScheduleConfig,
    clock: SharedClock,
}

impl Orchestrator {
    pub fn new(store: Arc<Store>, adapters: AdapterSet, clock: SharedClock) -> Self {
        let policies = Platform::ALL
            .iter()
            .map(|p| (*p, FetchPolicy::for_platform(*p)))
            .collect();
        Self {
            store,
            adapters,
            quotas: QuotaSet::new(),
            policies,
            cfg: IngestConfig::default(),
            schedule: ScheduleConfig::default(),
            clock,
        }
    }

    pub fn with_quotas(mut self, quotas: QuotaSet) -> Self {
        self.quotas = quotas;
        self
    }

    pub fn with_config(mut self, cfg: IngestConfig) -> Self {
        self.cfg = cfg.sanitized();
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = schedule.sanitized();
        self
    }

    pub fn with_policy(mut self, platform: Platform, policy: FetchPolicy) -> Self {
        self.policies.insert(platform, policy.sanitized());
        self
    }

    pub fn policy(&self, platform: Platform) -> FetchPolicy {
        self.policies
            .get(&platform)
            .copied()
            .unwrap_or_else(|| FetchPolicy::for_platform(platform))
    }

    /// Pick due sources (popularity tier vs. watermark age) and ingest them.
    pub async fn run_due_batch(self: &Arc<Self>, cancel: CancellationToken) -> Result<BatchResult> {
        let now = self.clock.now();
        let mut due = self.store.due_sources(now, &self.schedule)?;
        let found = due.len();
        due.truncate(self.cfg.max_sources);
        tracing::info!(
            target: "ingest",
            due = found,
            picked = due.len(),
            "due sources selected"
        );
        self.run_batch(due.into_iter().map(|d| d.source).collect(), cancel)
            .await
    }

    /// Fetch, normalize and upsert every source on a bounded worker pool.
    ///
    /// Adapter failures, quota blocks and bad items are contained to their
    /// source or item. A persistence failure stops the batch: remaining
    /// sources are not started and the error is returned.
    pub async fn run_batch(
        self: &Arc<Self>,
        sources: Vec<Source>,
        cancel: CancellationToken,
    ) -> Result<BatchResult> {
        ensure_metrics_described();

        let total = sources.len();
        let workers = self.cfg.max_concurrency.min(total.max(1));
        let queue = Arc::new(Mutex::new(VecDeque::from(sources)));
        let stop = cancel.child_token();

        if self.cfg.run_deadline_secs > 0 {
            let guard = stop.clone();
            let deadline = std::time::Duration::from_secs(self.cfg.run_deadline_secs);
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(deadline) => {
                        tracing::warn!(target: "ingest", "run deadline reached; cancelling batch");
                        guard.cancel();
                    }
                    _ = guard.cancelled() => {}
                }
            });
        }

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let me = Arc::clone(self);
            let queue = Arc::clone(&queue);
            let stop = stop.clone();
            set.spawn(async move { me.worker_loop(worker, queue, stop).await });
        }

        let mut result = BatchResult {
            total,
            ..Default::default()
        };
        let mut fatal: Option<Error> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((tally, err)) => {
                    result.absorb(&tally);
                    if let (None, Some(e)) = (&fatal, err) {
                        fatal = Some(e);
                    }
                }
                Err(e) => {
                    tracing::error!(target: "ingest", error = ?e, "ingest worker task failed");
                    stop.cancel();
                }
            }
        }
        if !queue.lock().is_empty() {
            result.cancelled = true;
        }
        // releases the deadline timer
        stop.cancel();

        self.quotas.flush_all().await;
        gauge!("ingest_batch_last_run_ts").set(self.clock.now().timestamp() as f64);

        if let Some(e) = fatal {
            tracing::error!(
                target: "ingest",
                error = %e,
                succeeded = result.succeeded,
                failed = result.failed,
                "ingest batch aborted"
            );
            return Err(e);
        }

        tracing::info!(
            target: "ingest",
            total = result.total,
            succeeded = result.succeeded,
            failed = result.failed,
            skipped = result.skipped,
            upserted = result.events_upserted,
            suppressed = result.events_suppressed,
            rejected = result.items_rejected,
            cancelled = result.cancelled,
            "ingest batch finished"
        );
        Ok(result)
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker: usize,
        queue: Arc<Mutex<VecDeque<Source>>>,
        stop: CancellationToken,
    ) -> (BatchResult, Option<Error>) {
        let mut tally = BatchResult::default();
        loop {
            if stop.is_cancelled() {
                tally.cancelled = true;
                break;
            }
            let Some(source) = queue.lock().pop_front() else {
                break;
            };

            // own task per source so a panic stays with that source
            let me = Arc::clone(&self);
            let job = source.clone();
            let mut task = tokio::spawn(async move { me.ingest_source(&job).await });

            let joined = tokio::select! {
                _ = stop.cancelled() => {
                    tracing::debug!(target: "ingest", worker, source_id = source.id, "source interrupted");
                    task.abort();
                    tally.cancelled = true;
                    break;
                }
                r = &mut task => r,
            };

            let outcome = match joined {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(
                        target: "ingest",
                        worker,
                        source_id = source.id,
                        error = %e,
                        "source task panicked; watermark kept"
                    );
                    if let Err(mark) = self.store.mark_fetch_error(source.id, "internal", self.clock.now()) {
                        tracing::warn!(target: "ingest", error = %mark, source_id = source.id, "could not record failure");
                    }
                    Ok(SourceOutcome::Failed)
                }
            };

            match outcome {
                Ok(SourceOutcome::Ingested {
                    upserted,
                    suppressed,
                    rejected,
                }) => {
                    tally.succeeded += 1;
                    tally.events_upserted += upserted;
                    tally.events_suppressed += suppressed;
                    tally.items_rejected += rejected;
                    counter!("ingest_sources_succeeded_total").increment(1);
                }
                Ok(SourceOutcome::Skipped) => {
                    tally.skipped += 1;
                    counter!("ingest_sources_skipped_total").increment(1);
                }
                Ok(SourceOutcome::Failed) => {
                    tally.failed += 1;
                    counter!("ingest_sources_failed_total").increment(1);
                }
                Err(e) => {
                    tally.failed += 1;
                    counter!("ingest_sources_failed_total").increment(1);
                    if e.is_fatal() {
                        stop.cancel();
                        return (tally, Some(e));
                    }
                    tracing::warn!(
                        target: "ingest",
                        error = %e,
                        kind = e.tag(),
                        source_id = source.id,
                        "source failed"
                    );
                }
            }
        }
        (tally, None)
    }

    /// One source end to end. `Err` is reserved for failures that must
    /// stop the batch.
    async fn ingest_source(&self, source: &Source) -> Result<SourceOutcome> {
        let now = self.clock.now();
        let Some(adapter) = self.adapters.get(source.platform) else {
            let err = Error::UnsupportedPlatform(source.platform);
            tracing::warn!(
                target: "ingest",
                source_id = source.id,
                platform = %source.platform,
                "no adapter registered; source marked"
            );
            self.store.mark_fetch_error(source.id, err.tag(), now)?;
            return Ok(SourceOutcome::Failed);
        };

        let policy = self.policy(source.platform);
        let slack = Duration::seconds(self.cfg.lookback_slack_secs);
        let since = fetch_since(&policy, source.last_fetched_at, now, slack);

        let charge = adapter.list_charge();
        let quota = self.quotas.get(source.platform);
        if let (Some(charge), Some(q)) = (charge, quota) {
            if !q.can_use(u64::from(charge.cost)) {
                tracing::info!(
                    target: "ingest",
                    source_id = source.id,
                    platform = %source.platform,
                    remaining = q.remaining(),
                    "quota exhausted; source skipped"
                );
                return Ok(SourceOutcome::Skipped);
            }
        }

        let sref = SourceRef::from(source);
        let started = Instant::now();
        let fetched = adapter.list_items_since(&sref, since).await;
        histogram!("ingest_fetch_ms").record(started.elapsed().as_secs_f64() * 1000.0);

        let items = match fetched {
            Ok(v) => v,
            Err(e) => {
                let err = Error::Adapter {
                    platform: source.platform,
                    source: e,
                };
                tracing::warn!(
                    target: "ingest",
                    error = %err,
                    source_id = source.id,
                    provider = adapter.name(),
                    "adapter fetch failed; watermark kept"
                );
                return Ok(SourceOutcome::Failed);
            }
        };
        if let (Some(charge), Some(q)) = (charge, quota) {
            q.record_usage(charge.endpoint, u64::from(charge.cost));
        }

        let mut rejected = 0usize;
        let mut events = Vec::with_capacity(items.len());
        for item in items {
            match normalize(&sref, item) {
                Ok(ev) => events.push(ev),
                Err(e) => {
                    rejected += 1;
                    counter!("ingest_items_rejected_total").increment(1);
                    tracing::debug!(target: "ingest", error = %e, source_id = source.id, "item rejected");
                }
            }
        }

        // Adapters may over-return; live and scheduled rows carry current state.
        events.retain(|ev| {
            matches!(ev.kind, EventKind::Live | EventKind::Scheduled)
                || ev.published_at.or(ev.start_at).is_some_and(|t| t >= since)
        });

        let shadow = match policy.shadow_window_secs {
            Some(secs) => {
                let lives = self
                    .store
                    .open_live_events(source.id, now)?
                    .iter()
                    .filter_map(|s| LiveMarker::from_event(&s.event))
                    .collect();
                let mut f = ShadowFilter::new(
                    ShadowPolicy {
                        window: Duration::seconds(secs),
                        title_similarity: policy.shadow_title_similarity,
                    },
                    lives,
                );
                for ev in &events {
                    f.observe(ev);
                }
                Some(f)
            }
            None => None,
        };

        let mut upserted = 0usize;
        let mut suppressed = 0usize;
        for ev in &events {
            if let Some(f) = shadow.as_ref() {
                if f.is_shadow(ev) {
                    suppressed += 1;
                    tracing::debug!(
                        target: "ingest",
                        source_id = source.id,
                        external_id = %ev.external_id,
                        "recorded item shadows a live item; suppressed"
                    );
                    continue;
                }
            }
            self.store.upsert_event(ev, now)?;
            upserted += 1;
        }
        counter!("ingest_events_upserted_total").increment(upserted as u64);
        counter!("ingest_events_suppressed_total").increment(suppressed as u64);

        self.store.mark_fetched(source.id, now)?;
        tracing::debug!(
            target: "ingest",
            source_id = source.id,
            source = source.label(),
            since = %since,
            upserted,
            suppressed,
            rejected,
            "source ingested"
        );
        Ok(SourceOutcome::Ingested {
            upserted,
            suppressed,
            rejected,
        })
    }
}
