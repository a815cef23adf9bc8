// src/ingest/types.rs
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Platform, Source, SourceDetails, SourceId};

/// What an adapter needs to address one Source upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub source_id: SourceId,
    pub platform: Platform,
    pub external_id: String,
    pub locator: Option<String>,
}

impl From<&Source> for SourceRef {
    fn from(s: &Source) -> Self {
        Self {
            source_id: s.id,
            platform: s.platform,
            external_id: s.external_id.clone(),
            locator: s.uploads_locator.clone(),
        }
    }
}

/// External id of an item the platform currently reports as live.
pub type LiveRef = String;

/// Metered cost of one upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCharge {
    pub endpoint: &'static str,
    pub cost: u32,
}

/// One upstream platform client. Implementations own HTTP/XML details and
/// pagination; they return fully paged results or an error.
#[async_trait::async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Items created or updated since `since` (adapters may over-return).
    async fn list_items_since(&self, source: &SourceRef, since: DateTime<Utc>) -> Result<Vec<RawItem>>;

    /// Whether [`current_live_state`](Self::current_live_state) is meaningful.
    fn supports_liveness(&self) -> bool {
        false
    }

    /// External ids of items live right now for the account.
    async fn current_live_state(&self, account: &SourceRef) -> Result<Vec<LiveRef>> {
        anyhow::bail!(
            "{} adapter has no liveness query (account {})",
            self.platform(),
            account.external_id
        )
    }

    /// Display metadata for an account, if the platform exposes it.
    async fn lookup_source(&self, _external_id: &str) -> Result<Option<SourceDetails>> {
        Ok(None)
    }

    /// Quota cost of `list_items_since`; `None` for unmetered platforms.
    fn list_charge(&self) -> Option<QuotaCharge> {
        None
    }

    fn liveness_charge(&self) -> Option<QuotaCharge> {
        None
    }

    fn lookup_charge(&self) -> Option<QuotaCharge> {
        None
    }

    fn name(&self) -> &'static str {
        self.platform().as_str()
    }
}

/// Adapters keyed by platform.
#[derive(Clone, Default)]
pub struct AdapterSet {
    inner: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.inner.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: Platform) -> Option<&Arc<dyn PlatformAdapter>> {
        self.inner.get(&platform)
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut v: Vec<Platform> = self.inner.keys().copied().collect();
        v.sort();
        v
    }
}

/// Upstream payloads, one variant per platform shape. Timestamps and
/// durations stay in their native text encodings until normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawItem {
    #[serde(rename = "youtube")]
    YouTube(YouTubeVideo),
    TwitchStream(TwitchStream),
    TwitchVideo(TwitchVideo),
    Podcast(PodcastEpisode),
    Radio(RadioProgram),
}

impl RawItem {
    pub fn platform(&self) -> Platform {
        match self {
            RawItem::YouTube(_) => Platform::YouTube,
            RawItem::TwitchStream(_) | RawItem::TwitchVideo(_) => Platform::Twitch,
            RawItem::Podcast(_) => Platform::Podcast,
            RawItem::Radio(_) => Platform::Radio,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YouTubeVideo {
    pub video_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// RFC3339.
    pub published_at: Option<String>,
    /// `live` | `upcoming` | `none`.
    pub live_broadcast_content: Option<String>,
    pub thumbnail_url: Option<String>,
    /// ISO-8601, e.g. `PT1H2M3S`.
    pub duration: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub comment_count: Option<u64>,
    pub scheduled_start_time: Option<String>,
    pub actual_start_time: Option<String>,
    pub actual_end_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitchStream {
    pub id: String,
    pub user_login: Option<String>,
    pub title: Option<String>,
    pub game_name: Option<String>,
    pub started_at: Option<String>,
    /// Template with `{width}`/`{height}` placeholders.
    pub thumbnail_url: Option<String>,
    pub viewer_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitchVideo {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub created_at: Option<String>,
    pub url: Option<String>,
    /// Template with `%{width}`/`%{height}` placeholders.
    pub thumbnail_url: Option<String>,
    /// e.g. `3h8m33s`.
    pub duration: Option<String>,
    pub view_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodcastEpisode {
    pub guid: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// RFC2822 as found in RSS `pubDate`.
    pub pub_date: Option<String>,
    pub link: Option<String>,
    pub enclosure_url: Option<String>,
    pub image_url: Option<String>,
    /// `itunes:duration`: seconds, `MM:SS` or `HH:MM:SS`.
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioProgram {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub duration_secs: Option<u64>,
}
