// src/timeline.rs
//! Subscriber timeline reads with keyset pagination.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::model::{Event, EventId, EventKind, Platform, Source, SourceId, StoredEvent};
use crate::store::{PageBound, Store, SubscriptionStore, TimelineRows};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 100,
        }
    }
}

impl TimelineConfig {
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        if self.max_limit == 0 {
            self.max_limit = d.max_limit;
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            self.default_limit = d.default_limit.min(self.max_limit);
        }
        self
    }

    /// `<= 0` → default; above the cap → cap.
    pub fn clamp_limit(&self, requested: i64) -> usize {
        if requested <= 0 {
            self.default_limit
        } else {
            usize::try_from(requested)
                .unwrap_or(self.max_limit)
                .min(self.max_limit)
        }
    }
}

/// Position after the last item of a page: `<rfc3339 key>|<event id>`.
///
/// A bare RFC3339 timestamp is also accepted and means "strictly older
/// than this instant".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineCursor {
    pub key: DateTime<Utc>,
    pub id: Option<EventId>,
}

impl TimelineCursor {
    pub fn after(ev: &StoredEvent) -> Option<Self> {
        Some(Self {
            key: ev.event.ordering_key()?,
            id: Some(ev.id),
        })
    }

    fn bound(&self) -> PageBound {
        match self.id {
            Some(id) => PageBound::After { key: self.key, id },
            None => PageBound::Before(self.key),
        }
    }
}

impl fmt::Display for TimelineCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = self.key.to_rfc3339_opts(SecondsFormat::Millis, true);
        match self.id {
            Some(id) => write!(f, "{key}|{id}"),
            None => f.write_str(&key),
        }
    }
}

impl FromStr for TimelineCursor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (ts, id) = match s.split_once('|') {
            Some((ts, id)) => {
                let id = id
                    .parse::<EventId>()
                    .map_err(|_| Error::Cursor(format!("bad id in cursor: {s}")))?;
                (ts, Some(id))
            }
            None => (s, None),
        };
        let key = DateTime::parse_from_rfc3339(ts)
            .map_err(|_| Error::Cursor(format!("bad timestamp in cursor: {s}")))?
            .with_timezone(&Utc);
        Ok(Self { key, id })
    }
}

/// Currently live: live type, already started and not yet ended.
pub fn is_live(ev: &Event, now: DateTime<Utc>) -> bool {
    ev.kind == EventKind::Live
        && ev.start_at.is_some_and(|s| s <= now)
        && ev.end_at.map_or(true, |e| e > now)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineItem {
    #[serde(flatten)]
    pub event: StoredEvent,
    pub source_name: Option<String>,
    pub source_thumbnail_url: Option<String>,
    pub is_live: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelinePage {
    pub items: Vec<TimelineItem>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

pub struct TimelineQuery {
    store: Arc<Store>,
    subscriptions: Arc<dyn SubscriptionStore>,
    clock: SharedClock,
    cfg: TimelineConfig,
}

impl TimelineQuery {
    pub fn new(
        store: Arc<Store>,
        subscriptions: Arc<dyn SubscriptionStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            subscriptions,
            clock,
            cfg: TimelineConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: TimelineConfig) -> Self {
        self.cfg = cfg.sanitized();
        self
    }

    /// One page of the user's timeline, newest first.
    pub fn list_timeline(
        &self,
        user_id: &str,
        cursor: Option<&str>,
        limit: i64,
        platform: Option<Platform>,
    ) -> Result<TimelinePage> {
        let limit = self.cfg.clamp_limit(limit);
        let cursor = cursor
            .filter(|c| !c.trim().is_empty())
            .map(TimelineCursor::from_str)
            .transpose()?;

        let scope = self.subscriptions.enabled_sources(user_id)?;
        if scope.is_empty() {
            return Ok(TimelinePage {
                items: Vec::new(),
                has_more: false,
                next_cursor: None,
            });
        }

        let mut rows = self.store.timeline_rows(&TimelineRows {
            source_ids: &scope,
            platform,
            bound: cursor.map(|c| c.bound()),
            limit: limit + 1,
        })?;

        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last()
                .and_then(TimelineCursor::after)
                .map(|c| c.to_string())
        } else {
            None
        };

        let now = self.clock.now();
        let mut sources: HashMap<SourceId, Option<Source>> = HashMap::new();
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let source = match sources.get(&row.event.source_id) {
                Some(s) => s.clone(),
                None => {
                    let s = self.store.get_source(row.event.source_id)?;
                    sources.insert(row.event.source_id, s.clone());
                    s
                }
            };
            items.push(TimelineItem {
                is_live: is_live(&row.event, now),
                source_name: source.as_ref().map(|s| s.label().to_string()),
                source_thumbnail_url: source.and_then(|s| s.thumbnail_url),
                event: row,
            });
        }

        tracing::debug!(
            target: "timeline",
            user = user_id,
            returned = items.len(),
            has_more,
            "timeline page served"
        );
        Ok(TimelinePage {
            items,
            has_more,
            next_cursor,
        })
    }
}
