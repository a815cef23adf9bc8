//! Timeline consolidator: batch entrypoints.
//!
//! Each subcommand is a bounded run meant to be triggered by cron or a job
//! scheduler. Exit status is non-zero only for setup failures and fatal
//! storage errors.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use timeline_consolidator::cache::TtlCache;
use timeline_consolidator::clock;
use timeline_consolidator::config::AppConfig;
use timeline_consolidator::enrich::SourceEnricher;
use timeline_consolidator::ingest::providers::FeedAdapter;
use timeline_consolidator::ingest::scheduler::{spawn_scheduler, IngestSchedulerCfg};
use timeline_consolidator::ingest::types::AdapterSet;
use timeline_consolidator::ingest::Orchestrator;
use timeline_consolidator::metrics::Metrics;
use timeline_consolidator::model::{Platform, PriorityTier};
use timeline_consolidator::quota::{QuotaSet, QuotaTracker};
use timeline_consolidator::reconcile::LiveReconciler;
use timeline_consolidator::store::Store;
use timeline_consolidator::timeline::TimelineQuery;

#[derive(Parser, Debug)]
#[command(name = "timeline-consolidator")]
#[command(about = "Ingest multi-platform content into one timeline and query it")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $TIMELINE_CONFIG_PATH, then config/timeline.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch due sources and upsert their events
    Ingest {
        /// Ingest every registered source instead of only due ones
        #[arg(long)]
        all: bool,

        /// Write Prometheus exposition here when the run ends
        #[arg(long)]
        metrics_textfile: Option<PathBuf>,
    },
    /// Keep ingesting due sources on a fixed cadence until interrupted
    Run {
        /// Seconds between due-batch ticks
        #[arg(long, default_value_t = 300)]
        interval_secs: u64,
    },
    /// Close live rows the platforms no longer report as live
    Reconcile {
        #[arg(long)]
        metrics_textfile: Option<PathBuf>,
    },
    /// Print one timeline page as JSON
    Timeline {
        #[arg(long)]
        user: String,

        #[arg(long)]
        cursor: Option<String>,

        /// Page size; 0 means the configured default
        #[arg(long, default_value_t = 0)]
        limit: i64,

        #[arg(long)]
        platform: Option<Platform>,
    },
    /// Look up a podcast feed, register it as a source, optionally subscribe
    RegisterFeed {
        url: String,

        /// Subscribe this user to the feed
        #[arg(long)]
        user: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().compact().with_writer(std::io::stderr)).init();
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let cfg = match &cli.config {
        Some(p) => AppConfig::load_from(p)?,
        None => AppConfig::load_default()?,
    };
    Ok(cfg)
}

fn build_adapters(cfg: &AppConfig) -> Result<AdapterSet> {
    let feed = FeedAdapter::http(&cfg.feed)?;
    Ok(AdapterSet::new().with(Arc::new(feed)))
}

fn build_quotas(cfg: &AppConfig, store: &Arc<Store>, clock: &clock::SharedClock) -> Result<QuotaSet> {
    let mut quotas = QuotaSet::new();
    for (platform, qcfg) in cfg.quotas() {
        let t = QuotaTracker::start(platform, qcfg, store.clone(), clock.clone())
            .with_context(|| format!("starting quota tracker for {platform}"))?;
        quotas = quotas.with(t);
    }
    Ok(quotas)
}

fn build_orchestrator(
    cfg: &AppConfig,
    store: &Arc<Store>,
    clock: &clock::SharedClock,
) -> Result<Arc<Orchestrator>> {
    let adapters = build_adapters(cfg)?;
    let quotas = build_quotas(cfg, store, clock)?;
    let mut orch = Orchestrator::new(store.clone(), adapters, clock.clone())
        .with_quotas(quotas)
        .with_config(cfg.ingest)
        .with_schedule(cfg.schedule);
    for p in Platform::ALL {
        orch = orch.with_policy(p, cfg.policy(p));
    }
    Ok(Arc::new(orch))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling run");
            t.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present; no-op otherwise.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    let clock = clock::system();
    let store = Arc::new(
        Store::open(&cfg.database_path)
            .with_context(|| format!("opening {}", cfg.database_path.display()))?,
    );

    match cli.command {
        Command::Ingest {
            all,
            metrics_textfile,
        } => {
            let metrics = metrics_textfile.as_ref().map(|_| Metrics::init()).transpose()?;
            let orch = build_orchestrator(&cfg, &store, &clock)?;

            let cancel = cancel_on_ctrl_c();
            let res = if all {
                orch.run_batch(store.list_sources()?, cancel).await
            } else {
                orch.run_due_batch(cancel).await
            };
            if let (Some(m), Some(p)) = (&metrics, &metrics_textfile) {
                m.write_textfile(p)?;
            }
            let res = res?;
            println!(
                "{}",
                serde_json::json!({
                    "total": res.total,
                    "succeeded": res.succeeded,
                    "failed": res.failed,
                    "skipped": res.skipped,
                    "events_upserted": res.events_upserted,
                    "events_suppressed": res.events_suppressed,
                    "items_rejected": res.items_rejected,
                    "cancelled": res.cancelled,
                })
            );
        }
        Command::Run { interval_secs } => {
            let orch = build_orchestrator(&cfg, &store, &clock)?;
            let cancel = cancel_on_ctrl_c();
            tracing::info!(interval_secs, "ingest scheduler started");
            spawn_scheduler(orch, IngestSchedulerCfg { interval_secs }, cancel)
                .await
                .context("ingest scheduler task")?;
            tracing::info!("ingest scheduler stopped");
        }
        Command::Reconcile { metrics_textfile } => {
            let metrics = metrics_textfile.as_ref().map(|_| Metrics::init()).transpose()?;
            let adapters = build_adapters(&cfg)?;
            let quotas = build_quotas(&cfg, &store, &clock)?;
            let rec = LiveReconciler::new(store.clone(), adapters, clock.clone()).with_quotas(quotas);

            let res = rec.reconcile(cancel_on_ctrl_c()).await;
            if let (Some(m), Some(p)) = (&metrics, &metrics_textfile) {
                m.write_textfile(p)?;
            }
            let res = res?;
            println!(
                "{}",
                serde_json::json!({
                    "checked": res.checked,
                    "closed": res.closed,
                    "failed_accounts": res.failed_accounts,
                })
            );
        }
        Command::Timeline {
            user,
            cursor,
            limit,
            platform,
        } => {
            let q = TimelineQuery::new(store.clone(), store.clone(), clock.clone())
                .with_config(cfg.timeline);
            let page = q.list_timeline(&user, cursor.as_deref(), limit, platform)?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Command::RegisterFeed { url, user } => {
            let adapters = build_adapters(&cfg)?;
            let cache = Arc::new(TtlCache::new(cfg.cache, clock.clone()));
            let enricher = SourceEnricher::new(store.clone(), adapters, cache, clock.clone());
            let found = enricher
                .lookup(Platform::Podcast, &url, PriorityTier::Low)
                .await?;
            let Some(details) = found.details else {
                anyhow::bail!("feed {url} returned no channel metadata");
            };
            let source = store
                .find_source(Platform::Podcast, &details.external_id)?
                .context("registered source not found")?;
            if let Some(u) = user {
                store.subscribe(&u, source.id, true, clock.now())?;
            }
            println!("{}", serde_json::to_string_pretty(&source)?);
        }
    }

    Ok(())
}
