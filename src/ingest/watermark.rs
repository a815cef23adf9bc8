// src/ingest/watermark.rs
//! Per-platform fetch windows.

use chrono::{DateTime, Duration, Utc};
use crate::model::Platform;

/// How far back a source is read, and which dedup rules apply to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchPolicy {
    /// Window for a source that has never been fetched.
    pub backfill_days: i64,
    /// Rolling floor: the computed `since` is never older than this.
    /// Only applied to watermark-derived windows.
    pub floor_days: Option<i64>,
    /// Suppress recorded items that shadow a live item within this window.
    pub shadow_window_secs: Option<i64>,
    /// Optional title similarity (0..=1) required on top of the time match.
    pub shadow_title_similarity: Option<f64>,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            backfill_days: 7,
            floor_days: None,
            shadow_window_secs: None,
            shadow_title_similarity: None,
        }
    }
}

impl FetchPolicy {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::YouTube => Self {
                backfill_days: 90,
                ..Self::default()
            },
            Platform::Twitch => Self {
                backfill_days: 7,
                floor_days: Some(7),
                shadow_window_secs: Some(3 * 3600),
                shadow_title_similarity: None,
            },
            Platform::Podcast => Self {
                backfill_days: 90,
                floor_days: Some(7),
                ..Self::default()
            },
            Platform::Radio => Self::default(),
        }
    }

    pub fn sanitized(mut self) -> Self {
        self.backfill_days = self.backfill_days.clamp(1, 3650);
        self.floor_days = self.floor_days.filter(|d| *d > 0);
        self.shadow_window_secs = self.shadow_window_secs.filter(|s| *s > 0);
        self.shadow_title_similarity = self
            .shadow_title_similarity
            .filter(|t| t.is_finite())
            .map(|t| t.clamp(0.0, 1.0));
        self
    }
}

/// Lower bound for the next fetch of a source.
///
/// Fetched before: `last_fetched_at - slack`, raised to `now - floor` when
/// the platform has a rolling floor. Never fetched: `now - backfill`.
pub fn fetch_since(
    policy: &FetchPolicy,
    last_fetched_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    slack: Duration,
) -> DateTime<Utc> {
    match last_fetched_at {
        Some(last) => {
            let since = last - slack;
            match policy.floor_days {
                Some(days) => since.max(now - Duration::days(days)),
                None => since,
            }
        }
        None => now - Duration::days(policy.backfill_days),
    }
}
