// src/model.rs
//! Canonical data model shared by ingestion, storage and the timeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NormalizeError;

pub type SourceId = i64;
pub type EventId = i64;

/// Content platform. Each platform contributes its own raw item shapes and
/// metrics keys; the string form is the `platform_id` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    YouTube,
    Twitch,
    Podcast,
    Radio,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::YouTube,
        Platform::Twitch,
        Platform::Podcast,
        Platform::Radio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::YouTube => "youtube",
            Platform::Twitch => "twitch",
            Platform::Podcast => "podcast",
            Platform::Radio => "radio",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "youtube" => Ok(Platform::YouTube),
            "twitch" => Ok(Platform::Twitch),
            "podcast" => Ok(Platform::Podcast),
            "radio" => Ok(Platform::Radio),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Event `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Live,
    Scheduled,
    Video,
    Episode,
    Radio,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Live => "live",
            EventKind::Scheduled => "scheduled",
            EventKind::Video => "video",
            EventKind::Episode => "episode",
            EventKind::Radio => "radio",
        }
    }

    /// Recorded (non-live, already published) content.
    pub fn is_recorded(&self) -> bool {
        matches!(self, EventKind::Video | EventKind::Episode)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(EventKind::Live),
            "scheduled" => Ok(EventKind::Scheduled),
            "video" => Ok(EventKind::Video),
            "episode" => Ok(EventKind::Episode),
            "radio" => Ok(EventKind::Radio),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// Source `fetch_status` column: `pending` until the first successful fetch,
/// `ok` afterwards, or `error:<tag>` for non-transient problems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchStatus {
    Pending,
    Ok,
    Error(String),
}

impl FetchStatus {
    pub fn as_db(&self) -> String {
        match self {
            FetchStatus::Pending => "pending".to_string(),
            FetchStatus::Ok => "ok".to_string(),
            FetchStatus::Error(tag) => format!("error:{tag}"),
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "ok" => FetchStatus::Ok,
            "pending" | "" => FetchStatus::Pending,
            other => FetchStatus::Error(
                other
                    .strip_prefix("error:")
                    .unwrap_or(other)
                    .to_string(),
            ),
        }
    }
}

/// Popularity tier of a source. Drives cache TTLs and refresh intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    High,
    Medium,
    Low,
}

impl PriorityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityTier::High => "high",
            PriorityTier::Medium => "medium",
            PriorityTier::Low => "low",
        }
    }
}

/// Media length, rendered as `HH:MM:SS`, or `MM:SS` when under an hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MediaDuration {
    secs: u64,
}

impl MediaDuration {
    pub fn from_secs(secs: u64) -> Self {
        Self { secs }
    }

    pub fn as_secs(&self) -> u64 {
        self.secs
    }

    /// Parse the canonical textual form back (used when reading rows).
    pub fn parse_canonical(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let nums: Option<Vec<u64>> = parts.iter().map(|p| p.parse::<u64>().ok()).collect();
        let nums = nums?;
        let secs = match nums.as_slice() {
            [m, s] => m.checked_mul(60)?.checked_add(*s)?,
            [h, m, s] => h
                .checked_mul(3600)?
                .checked_add(m.checked_mul(60)?)?
                .checked_add(*s)?,
            _ => return None,
        };
        Some(Self { secs })
    }
}

impl fmt::Display for MediaDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = self.secs / 3600;
        let m = (self.secs % 3600) / 60;
        let s = self.secs % 60;
        if h > 0 {
            write!(f, "{h:02}:{m:02}:{s:02}")
        } else {
            write!(f, "{m:02}:{s:02}")
        }
    }
}

impl Serialize for MediaDuration {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Numeric engagement figures. Each platform owns a closed set of keys; the
/// persisted form is a plain JSON object and unknown or mistyped keys read
/// back as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EventMetrics {
    YouTube(YouTubeMetrics),
    Twitch(TwitchMetrics),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct YouTubeMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TwitchMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewers: Option<u64>,
}

impl EventMetrics {
    /// Look a figure up by its persisted key. Keys the platform does not
    /// define are `None`.
    pub fn get(&self, key: &str) -> Option<u64> {
        match (self, key) {
            (EventMetrics::YouTube(m), "views") => m.views,
            (EventMetrics::YouTube(m), "likes") => m.likes,
            (EventMetrics::YouTube(m), "comments") => m.comments,
            (EventMetrics::Twitch(m), "views") => m.views,
            (EventMetrics::Twitch(m), "viewers") => m.viewers,
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            EventMetrics::YouTube(m) => m.views.is_none() && m.likes.is_none() && m.comments.is_none(),
            EventMetrics::Twitch(m) => m.views.is_none() && m.viewers.is_none(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode a stored blob for `platform`. Returns `None` for platforms
    /// without metrics, for malformed blobs and for blobs with no known keys.
    pub fn from_json(platform: Platform, raw: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        let obj = value.as_object()?;
        let num = |k: &str| -> Option<u64> {
            let v = obj.get(k)?;
            v.as_u64()
                .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        };
        let m = match platform {
            Platform::YouTube => EventMetrics::YouTube(YouTubeMetrics {
                views: num("views"),
                likes: num("likes"),
                comments: num("comments"),
            }),
            Platform::Twitch => EventMetrics::Twitch(TwitchMetrics {
                views: num("views"),
                viewers: num("viewers"),
            }),
            Platform::Podcast | Platform::Radio => return None,
        };
        (!m.is_empty()).then_some(m)
    }
}

/// One content-producing account/feed on one platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub id: SourceId,
    pub platform: Platform,
    pub external_id: String,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Uploads playlist id, feed URL, station id... whatever the adapter
    /// needs to list items.
    pub uploads_locator: Option<String>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub fetch_status: FetchStatus,
}

impl Source {
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.external_id)
    }
}

/// Display metadata for registering or refreshing a Source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDetails {
    pub platform: Platform,
    pub external_id: String,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub thumbnail_url: Option<String>,
    pub uploads_locator: Option<String>,
}

/// Normalized content item, ready for upsert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub platform: Platform,
    pub source_id: SourceId,
    pub external_id: String,
    pub kind: EventKind,
    pub title: String,
    pub description: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub url: String,
    pub image_url: Option<String>,
    pub duration: Option<MediaDuration>,
    pub metrics: Option<EventMetrics>,
}

impl Event {
    /// Timeline ordering key: `coalesce(start_at, published_at)`.
    pub fn ordering_key(&self) -> Option<DateTime<Utc>> {
        self.start_at.or(self.published_at)
    }

    pub fn validate(&self) -> Result<(), NormalizeError> {
        if self.external_id.trim().is_empty() {
            return Err(NormalizeError::MissingField("external_id"));
        }
        if self.url.trim().is_empty() {
            return Err(NormalizeError::MissingField("url"));
        }
        if self.start_at.is_none() && self.published_at.is_none() {
            return Err(NormalizeError::NoTimestamp);
        }
        Ok(())
    }
}

/// An event as persisted, with its row id (insertion order).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEvent {
    pub id: EventId,
    #[serde(flatten)]
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_renders_short_and_long_forms() {
        assert_eq!(MediaDuration::from_secs(59).to_string(), "00:59");
        assert_eq!(MediaDuration::from_secs(754).to_string(), "12:34");
        assert_eq!(MediaDuration::from_secs(3723).to_string(), "01:02:03");
        assert_eq!(MediaDuration::from_secs(36_000).to_string(), "10:00:00");
    }

    #[test]
    fn canonical_duration_reads_back() {
        let d = MediaDuration::from_secs(3723);
        assert_eq!(MediaDuration::parse_canonical(&d.to_string()), Some(d));
        assert_eq!(MediaDuration::parse_canonical("nope"), None);
        assert_eq!(MediaDuration::parse_canonical("9999999999999999:00:00"), None);
        assert_eq!(MediaDuration::parse_canonical("18446744073709551615:59"), None);
    }

    #[test]
    fn metrics_unknown_keys_are_absent() {
        let m = EventMetrics::from_json(Platform::YouTube, r#"{"views": 10, "stars": 3}"#).unwrap();
        assert_eq!(m.get("views"), Some(10));
        assert_eq!(m.get("stars"), None);
        assert_eq!(m.get("viewers"), None);
    }

    #[test]
    fn metrics_malformed_or_foreign_blobs_are_none() {
        assert!(EventMetrics::from_json(Platform::YouTube, "not json").is_none());
        assert!(EventMetrics::from_json(Platform::Twitch, r#"{"likes": 1}"#).is_none());
        assert!(EventMetrics::from_json(Platform::Podcast, r#"{"views": 1}"#).is_none());
    }

    #[test]
    fn metrics_json_omits_unset_fields() {
        let m = EventMetrics::Twitch(TwitchMetrics {
            views: None,
            viewers: Some(42),
        });
        assert_eq!(m.to_json().unwrap(), r#"{"viewers":42}"#);
    }

    #[test]
    fn fetch_status_db_roundtrip() {
        for st in [
            FetchStatus::Pending,
            FetchStatus::Ok,
            FetchStatus::Error("unsupported-platform".into()),
        ] {
            assert_eq!(FetchStatus::from_db(&st.as_db()), st);
        }
    }

    #[test]
    fn platform_parses_case_insensitively() {
        assert_eq!("YouTube".parse::<Platform>(), Ok(Platform::YouTube));
        assert!("myspace".parse::<Platform>().is_err());
    }
}
