// src/config/mod.rs
//! Application configuration (`config/timeline.toml`).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::error::{Error, Result};
use crate::ingest::providers::FeedConfig;
use crate::ingest::scheduler::ScheduleConfig;
use crate::ingest::watermark::FetchPolicy;
use crate::ingest::IngestConfig;
use crate::model::Platform;
use crate::quota::QuotaConfig;
use crate::timeline::TimelineConfig;

pub const ENV_CONFIG_PATH: &str = "TIMELINE_CONFIG_PATH";
pub const ENV_DATABASE_PATH: &str = "DATABASE_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/timeline.toml";

/// Per-platform overrides of the built-in fetch policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PolicyOverride {
    pub initial_backfill_days: Option<i64>,
    /// `0` disables the floor.
    pub rolling_window_days: Option<i64>,
    /// `0` disables live-shadow suppression.
    pub live_shadow_window_secs: Option<i64>,
    pub live_shadow_title_similarity: Option<f64>,
}

impl PolicyOverride {
    pub fn apply(&self, mut base: FetchPolicy) -> FetchPolicy {
        if let Some(d) = self.initial_backfill_days {
            base.backfill_days = d;
        }
        if let Some(d) = self.rolling_window_days {
            base.floor_days = Some(d);
        }
        if let Some(s) = self.live_shadow_window_secs {
            base.shadow_window_secs = Some(s);
        }
        if let Some(t) = self.live_shadow_title_similarity {
            base.shadow_title_similarity = Some(t);
        }
        base.sanitized()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub ingest: IngestConfig,
    /// Keyed by platform id (`youtube`, `twitch`, `podcast`, `radio`).
    pub platforms: HashMap<String, PolicyOverride>,
    pub quota: HashMap<String, QuotaConfig>,
    pub schedule: ScheduleConfig,
    pub cache: CacheConfig,
    pub timeline: TimelineConfig,
    pub feed: FeedConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/timeline.db"),
            ingest: IngestConfig::default(),
            platforms: HashMap::new(),
            quota: HashMap::from([(
                Platform::YouTube.as_str().to_string(),
                QuotaConfig::default(),
            )]),
            schedule: ScheduleConfig::default(),
            cache: CacheConfig::default(),
            timeline: TimelineConfig::default(),
            feed: FeedConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from an explicit TOML file. `$DATABASE_PATH` still wins.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        Ok(Self::parse(&content)?.with_env_overrides())
    }

    /// Load using env var + fallbacks:
    /// 1) $TIMELINE_CONFIG_PATH
    /// 2) config/timeline.toml
    /// 3) built-in defaults
    ///
    /// `$DATABASE_PATH` overrides `database_path` in every case.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(Error::Config(format!(
                    "{ENV_CONFIG_PATH} points to non-existent path {}",
                    pb.display()
                )));
            }
            return Self::load_from(&pb);
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            Self::load_from(&default_p)
        } else {
            Ok(Self::default().with_env_overrides())
        }
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(db) = std::env::var(ENV_DATABASE_PATH) {
            if !db.trim().is_empty() {
                self.database_path = PathBuf::from(db);
            }
        }
        self
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: AppConfig =
            toml::from_str(s).map_err(|e| Error::Config(format!("parsing config: {e}")))?;
        Ok(cfg.sanitized())
    }

    fn sanitized(mut self) -> Self {
        self.ingest = self.ingest.sanitized();
        self.schedule = self.schedule.sanitized();
        self.cache = self.cache.sanitized();
        self.timeline = self.timeline.sanitized();
        if self.feed.timeout_secs == 0 {
            self.feed.timeout_secs = FeedConfig::default().timeout_secs;
        }
        for (id, q) in self.quota.iter_mut() {
            if q.daily_limit == 0 {
                tracing::warn!(target: "config", platform = %id, "daily_limit 0 replaced by default");
                q.daily_limit = QuotaConfig::default().daily_limit;
            }
            q.reset_offset_minutes = q.reset_offset_minutes.clamp(-14 * 60, 14 * 60);
        }
        self
    }

    /// Effective fetch policy for a platform.
    pub fn policy(&self, platform: Platform) -> FetchPolicy {
        let base = FetchPolicy::for_platform(platform);
        match self.platforms.get(platform.as_str()) {
            Some(o) => o.apply(base),
            None => base,
        }
    }

    /// Quota settings per metered platform; unknown ids are reported and
    /// dropped.
    pub fn quotas(&self) -> Vec<(Platform, QuotaConfig)> {
        let mut out = Vec::new();
        for (id, q) in &self.quota {
            match id.parse::<Platform>() {
                Ok(p) => out.push((p, *q)),
                Err(e) => tracing::warn!(target: "config", error = %e, "ignoring quota section"),
            }
        }
        out.sort_by_key(|(p, _)| *p);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_defaults() {
        let cfg = AppConfig::parse("").unwrap();
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn out_of_range_values_are_sanitized() {
        let cfg = AppConfig::parse(
            r#"
            [ingest]
            max_concurrency = 0
            lookback_slack_secs = -5

            [timeline]
            default_limit = 0
            max_limit = 0

            [quota.youtube]
            daily_limit = 0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.ingest.max_concurrency, 1);
        assert_eq!(cfg.ingest.lookback_slack_secs, 0);
        assert_eq!(cfg.timeline.max_limit, 100);
        assert_eq!(cfg.timeline.default_limit, 50);
        assert_eq!(cfg.quotas(), vec![(Platform::YouTube, QuotaConfig::default())]);
    }

    #[test]
    fn platform_overrides_apply_on_top_of_defaults() {
        let cfg = AppConfig::parse(
            r#"
            [platforms.twitch]
            live_shadow_window_secs = 7200
            live_shadow_title_similarity = 0.6

            [platforms.podcast]
            rolling_window_days = 0
            "#,
        )
        .unwrap();
        let tw = cfg.policy(Platform::Twitch);
        assert_eq!(tw.shadow_window_secs, Some(7200));
        assert_eq!(tw.shadow_title_similarity, Some(0.6));
        assert_eq!(tw.floor_days, Some(7));
        assert_eq!(cfg.policy(Platform::Podcast).floor_days, None);
        assert_eq!(cfg.policy(Platform::YouTube).backfill_days, 90);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(AppConfig::parse("[ingest"), Err(Error::Config(_))));
    }
}
