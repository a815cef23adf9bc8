// src/ingest/dedup.rs
//! Live/VOD shadow suppression.
//!
//! Some platforms publish a recorded copy of every live broadcast. When a
//! recorded item lands close in time to a live item of the same source,
//! it is the archive of that broadcast and only the live row is kept.

use chrono::{DateTime, Duration, Utc};

use crate::model::{Event, EventKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowPolicy {
    pub window: Duration,
    /// Normalized Levenshtein similarity the titles must also reach.
    pub title_similarity: Option<f64>,
}

/// A live item known for the source (stored or seen earlier in the batch).
#[derive(Debug, Clone, PartialEq)]
pub struct LiveMarker {
    pub start_at: DateTime<Utc>,
    pub title: String,
}

impl LiveMarker {
    pub fn from_event(ev: &Event) -> Option<Self> {
        if ev.kind != EventKind::Live {
            return None;
        }
        Some(Self {
            start_at: ev.start_at.or(ev.published_at)?,
            title: ev.title.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ShadowFilter {
    policy: ShadowPolicy,
    lives: Vec<LiveMarker>,
}

impl ShadowFilter {
    pub fn new(policy: ShadowPolicy, lives: Vec<LiveMarker>) -> Self {
        Self { policy, lives }
    }

    /// Track a live item upserted during the current batch.
    pub fn observe(&mut self, ev: &Event) {
        if let Some(m) = LiveMarker::from_event(ev) {
            self.lives.push(m);
        }
    }

    /// True if `ev` is a recorded item shadowing a known live item.
    pub fn is_shadow(&self, ev: &Event) -> bool {
        if !ev.kind.is_recorded() {
            return false;
        }
        let Some(published) = ev.published_at else {
            return false;
        };
        self.lives.iter().any(|live| {
            let gap = (published - live.start_at).num_seconds().abs();
            if gap >= self.policy.window.num_seconds() {
                return false;
            }
            match self.policy.title_similarity {
                Some(min) => {
                    strsim::normalized_levenshtein(
                        &live.title.to_lowercase(),
                        &ev.title.to_lowercase(),
                    ) >= min
                }
                None => true,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Platform;
    use chrono::TimeZone;

    fn ev(kind: EventKind, at: DateTime<Utc>, title: &str) -> Event {
        Event {
            platform: Platform::Twitch,
            source_id: 1,
            external_id: format!("{kind}-{}", at.timestamp()),
            kind,
            title: title.into(),
            description: None,
            start_at: (kind == EventKind::Live).then_some(at),
            end_at: None,
            published_at: Some(at),
            url: "https://www.twitch.tv/x".into(),
            image_url: None,
            duration: None,
            metrics: None,
        }
    }

    fn policy(sim: Option<f64>) -> ShadowPolicy {
        ShadowPolicy {
            window: Duration::hours(3),
            title_similarity: sim,
        }
    }

    #[test]
    fn vod_near_live_is_suppressed() {
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 20, 0, 0).unwrap();
        let mut f = ShadowFilter::new(policy(None), vec![]);
        f.observe(&ev(EventKind::Live, t0, "Ranked grind"));
        assert!(f.is_shadow(&ev(EventKind::Video, t0 + Duration::minutes(2), "Ranked grind")));
        assert!(f.is_shadow(&ev(EventKind::Video, t0 - Duration::minutes(170), "whatever")));
        assert!(!f.is_shadow(&ev(EventKind::Video, t0 + Duration::hours(3), "Ranked grind")));
    }

    #[test]
    fn live_items_are_never_shadows() {
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 20, 0, 0).unwrap();
        let mut f = ShadowFilter::new(policy(None), vec![]);
        f.observe(&ev(EventKind::Live, t0, "a"));
        assert!(!f.is_shadow(&ev(EventKind::Live, t0, "a")));
    }

    #[test]
    fn title_similarity_gate() {
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 20, 0, 0).unwrap();
        let live = LiveMarker {
            start_at: t0,
            title: "Speedrun practice day 3".into(),
        };
        let f = ShadowFilter::new(policy(Some(0.8)), vec![live]);
        assert!(f.is_shadow(&ev(EventKind::Video, t0, "Speedrun practice day 3!")));
        assert!(!f.is_shadow(&ev(EventKind::Video, t0, "Cooking stream")));
    }
}
