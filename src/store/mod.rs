// src/store/mod.rs
//! SQLite-backed persistence for sources, events, subscriptions and quota
//! usage. A single connection behind a mutex; every call is short.

pub mod schema;

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::ingest::scheduler::{select_due, DueSource, ScheduleConfig};
use crate::model::{
    Event, EventId, EventKind, EventMetrics, FetchStatus, MediaDuration, Platform, Source,
    SourceDetails, SourceId, StoredEvent,
};

/// Persisted per-day quota usage.
pub trait QuotaLedger: Send + Sync {
    /// Units recorded for `platform` on `date` (`YYYY-MM-DD`), all endpoints.
    fn daily_total(&self, platform: Platform, date: &str) -> Result<u64>;

    /// Accumulate `cost` units for one endpoint.
    fn add_usage(&self, date: &str, platform: Platform, endpoint: &str, cost: u64) -> Result<()>;
}

/// Which sources a user follows.
pub trait SubscriptionStore: Send + Sync {
    /// Source ids the user has enabled, ascending.
    fn enabled_sources(&self, user_id: &str) -> Result<Vec<SourceId>>;
}

/// Keyset bound for timeline reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageBound {
    /// Rows strictly after `(key, id)` in timeline order.
    After { key: DateTime<Utc>, id: EventId },
    /// Rows whose ordering key is strictly older than `key`.
    Before(DateTime<Utc>),
}

/// One timeline page request against the events table.
#[derive(Debug, Clone)]
pub struct TimelineRows<'a> {
    pub source_ids: &'a [SourceId],
    pub platform: Option<Platform>,
    pub bound: Option<PageBound>,
    pub limit: usize,
}

/// A source with its count of enabled subscribers.
#[derive(Debug, Clone)]
pub struct SourcePopularity {
    pub source: Source,
    pub subscribers: u64,
}

const SOURCE_COLS: &str = "id, platform_id, external_id, handle, display_name, thumbnail_url, \
                           uploads_locator, last_fetched_at, fetch_status";

const EVENT_COLS: &str = "id, platform_id, source_id, external_event_id, type, title, description, \
                          start_at, end_at, published_at, url, image_url, metrics_json, duration";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        schema::init_schema(&conn)?;
        tracing::debug!(target: "store", path = %path.display(), "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- sources ----

    /// Register a source or refresh its display metadata. Watermark and
    /// fetch status are left alone on update.
    pub fn upsert_source(&self, details: &SourceDetails, now: DateTime<Utc>) -> Result<Source> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sources (platform_id, external_id, handle, display_name, thumbnail_url,
                                  uploads_locator, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(platform_id, external_id) DO UPDATE SET
                handle = COALESCE(excluded.handle, sources.handle),
                display_name = COALESCE(excluded.display_name, sources.display_name),
                thumbnail_url = COALESCE(excluded.thumbnail_url, sources.thumbnail_url),
                uploads_locator = COALESCE(excluded.uploads_locator, sources.uploads_locator),
                updated_at = excluded.updated_at",
            params![
                details.platform.as_str(),
                details.external_id,
                details.handle,
                details.display_name,
                details.thumbnail_url,
                details.uploads_locator,
                now.timestamp_millis(),
            ],
        )?;
        let src = conn.query_row(
            &format!("SELECT {SOURCE_COLS} FROM sources WHERE platform_id = ?1 AND external_id = ?2"),
            params![details.platform.as_str(), details.external_id],
            source_from_row,
        )?;
        Ok(src)
    }

    pub fn get_source(&self, id: SourceId) -> Result<Option<Source>> {
        let conn = self.conn.lock();
        let src = conn
            .query_row(
                &format!("SELECT {SOURCE_COLS} FROM sources WHERE id = ?1"),
                [id],
                source_from_row,
            )
            .optional()?;
        Ok(src)
    }

    pub fn find_source(&self, platform: Platform, external_id: &str) -> Result<Option<Source>> {
        let conn = self.conn.lock();
        let src = conn
            .query_row(
                &format!("SELECT {SOURCE_COLS} FROM sources WHERE platform_id = ?1 AND external_id = ?2"),
                params![platform.as_str(), external_id],
                source_from_row,
            )
            .optional()?;
        Ok(src)
    }

    pub fn list_sources(&self) -> Result<Vec<Source>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {SOURCE_COLS} FROM sources ORDER BY id"))?;
        let rows = stmt
            .query_map([], source_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Advance the watermark after a fully persisted fetch.
    pub fn mark_fetched(&self, id: SourceId, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sources SET last_fetched_at = ?1, fetch_status = ?2, updated_at = ?1
             WHERE id = ?3",
            params![at.timestamp_millis(), FetchStatus::Ok.as_db(), id],
        )?;
        Ok(())
    }

    /// Record a non-transient problem; the watermark is not touched.
    pub fn mark_fetch_error(&self, id: SourceId, tag: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sources SET fetch_status = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                FetchStatus::Error(tag.to_string()).as_db(),
                now.timestamp_millis(),
                id
            ],
        )?;
        Ok(())
    }

    /// Every source with its enabled-subscriber count, plus the number of
    /// distinct users holding at least one enabled subscription.
    pub fn source_popularity(&self) -> Result<(Vec<SourcePopularity>, u64)> {
        let conn = self.conn.lock();
        let total_users: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT user_id) FROM user_subscriptions WHERE enabled = 1",
            [],
            |r| r.get(0),
        )?;
        let cols = SOURCE_COLS
            .split(", ")
            .map(|c| format!("s.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {cols}, COUNT(u.user_id)
             FROM sources s
             LEFT JOIN user_subscriptions u ON u.source_id = s.id AND u.enabled = 1
             GROUP BY s.id
             ORDER BY s.id"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                let source = source_from_row(row)?;
                let subs: i64 = row.get(9)?;
                Ok(SourcePopularity {
                    source,
                    subscribers: subs.max(0) as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((rows, total_users.max(0) as u64))
    }

    /// Sources whose tier refresh interval has elapsed.
    pub fn due_sources(&self, now: DateTime<Utc>, schedule: &ScheduleConfig) -> Result<Vec<DueSource>> {
        let (pop, total_users) = self.source_popularity()?;
        Ok(select_due(pop, total_users, now, schedule))
    }

    // ---- subscriptions ----

    pub fn subscribe(&self, user_id: &str, source_id: SourceId, enabled: bool, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO user_subscriptions (user_id, source_id, enabled, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, source_id) DO UPDATE SET enabled = excluded.enabled",
            params![user_id, source_id, enabled as i64, now.timestamp_millis()],
        )?;
        Ok(())
    }

    // ---- events ----

    /// Insert or fully replace the mutable fields of an event keyed by
    /// `(platform, external_id)`. The row id survives updates.
    pub fn upsert_event(&self, ev: &Event, now: DateTime<Utc>) -> Result<EventId> {
        let metrics = match &ev.metrics {
            Some(m) => Some(m.to_json()?),
            None => None,
        };
        let conn = self.conn.lock();
        let id = conn.query_row(
            "INSERT INTO events (platform_id, source_id, external_event_id, type, title, description,
                                 start_at, end_at, published_at, url, image_url, metrics_json,
                                 duration, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
             ON CONFLICT(platform_id, external_event_id) DO UPDATE SET
                source_id = excluded.source_id,
                type = excluded.type,
                title = excluded.title,
                description = excluded.description,
                start_at = excluded.start_at,
                end_at = excluded.end_at,
                published_at = excluded.published_at,
                url = excluded.url,
                image_url = excluded.image_url,
                metrics_json = excluded.metrics_json,
                duration = excluded.duration,
                updated_at = excluded.updated_at
             RETURNING id",
            params![
                ev.platform.as_str(),
                ev.source_id,
                ev.external_id,
                ev.kind.as_str(),
                ev.title,
                ev.description,
                ev.start_at.map(|t| t.timestamp_millis()),
                ev.end_at.map(|t| t.timestamp_millis()),
                ev.published_at.map(|t| t.timestamp_millis()),
                ev.url,
                ev.image_url,
                metrics,
                ev.duration.map(|d| d.to_string()),
                now.timestamp_millis(),
            ],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn get_event(&self, platform: Platform, external_id: &str) -> Result<Option<StoredEvent>> {
        let conn = self.conn.lock();
        let ev = conn
            .query_row(
                &format!(
                    "SELECT {EVENT_COLS} FROM events WHERE platform_id = ?1 AND external_event_id = ?2"
                ),
                params![platform.as_str(), external_id],
                event_from_row,
            )
            .optional()?;
        Ok(ev)
    }

    pub fn count_events(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Live rows of one source with no end time or an end still ahead of `now`.
    pub fn open_live_events(&self, source_id: SourceId, now: DateTime<Utc>) -> Result<Vec<StoredEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLS} FROM events
             WHERE source_id = ?1 AND type = 'live' AND (end_at IS NULL OR end_at > ?2)
             ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![source_id, now.timestamp_millis()], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Open live rows across all sources of a platform.
    pub fn open_live_events_for(&self, platform: Platform, now: DateTime<Utc>) -> Result<Vec<StoredEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLS} FROM events
             WHERE platform_id = ?1 AND type = 'live' AND (end_at IS NULL OR end_at > ?2)
             ORDER BY source_id, id"
        ))?;
        let rows = stmt
            .query_map(params![platform.as_str(), now.timestamp_millis()], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Turn a live row into a recording ended at `end_at`.
    /// Returns false when the row is no longer live.
    pub fn close_live_event(&self, id: EventId, end_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE events SET type = ?1, end_at = ?2, updated_at = ?2
             WHERE id = ?3 AND type = 'live'",
            params![EventKind::Video.as_str(), end_at.timestamp_millis(), id],
        )?;
        Ok(n > 0)
    }

    /// Keyset page in timeline order: ordering key descending, id ascending.
    pub fn timeline_rows(&self, q: &TimelineRows<'_>) -> Result<Vec<StoredEvent>> {
        if q.source_ids.is_empty() || q.limit == 0 {
            return Ok(Vec::new());
        }

        let mut sql = format!("SELECT {EVENT_COLS} FROM events WHERE source_id IN (");
        let mut args: Vec<Value> = Vec::with_capacity(q.source_ids.len() + 4);
        for (i, id) in q.source_ids.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('?');
            args.push(Value::Integer(*id));
        }
        sql.push(')');

        if let Some(p) = q.platform {
            sql.push_str(" AND platform_id = ?");
            args.push(Value::Text(p.as_str().to_string()));
        }
        match q.bound {
            Some(PageBound::After { key, id }) => {
                sql.push_str(
                    " AND (COALESCE(start_at, published_at) < ? \
                     OR (COALESCE(start_at, published_at) = ? AND id > ?))",
                );
                let k = key.timestamp_millis();
                args.push(Value::Integer(k));
                args.push(Value::Integer(k));
                args.push(Value::Integer(id));
            }
            Some(PageBound::Before(key)) => {
                sql.push_str(" AND COALESCE(start_at, published_at) < ?");
                args.push(Value::Integer(key.timestamp_millis()));
            }
            None => {}
        }
        sql.push_str(" ORDER BY COALESCE(start_at, published_at) DESC, id ASC LIMIT ?");
        args.push(Value::Integer(q.limit as i64));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args), event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl QuotaLedger for Store {
    fn daily_total(&self, platform: Platform, date: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COALESCE(SUM(quota_cost), 0) FROM api_quota_usage
             WHERE date = ?1 AND platform_id = ?2",
            params![date, platform.as_str()],
            |r| r.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    fn add_usage(&self, date: &str, platform: Platform, endpoint: &str, cost: u64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO api_quota_usage (date, platform_id, endpoint, quota_cost)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(date, platform_id, endpoint)
             DO UPDATE SET quota_cost = quota_cost + excluded.quota_cost",
            params![date, platform.as_str(), endpoint, cost as i64],
        )?;
        Ok(())
    }
}

impl SubscriptionStore for Store {
    fn enabled_sources(&self, user_id: &str) -> Result<Vec<SourceId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT source_id FROM user_subscriptions
             WHERE user_id = ?1 AND enabled = 1
             ORDER BY source_id",
        )?;
        let ids = stmt
            .query_map([user_id], |r| r.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}

fn from_ms(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::<Utc>::from_timestamp_millis)
}

fn text_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
    )
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<Source> {
    let platform: String = row.get(1)?;
    let status: String = row.get(8)?;
    Ok(Source {
        id: row.get(0)?,
        platform: platform.parse().map_err(|e| text_err(1, e))?,
        external_id: row.get(2)?,
        handle: row.get(3)?,
        display_name: row.get(4)?,
        thumbnail_url: row.get(5)?,
        uploads_locator: row.get(6)?,
        last_fetched_at: from_ms(row.get(7)?),
        fetch_status: FetchStatus::from_db(&status),
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<StoredEvent> {
    let platform: Platform = row
        .get::<_, String>(1)?
        .parse()
        .map_err(|e| text_err(1, e))?;
    let kind: EventKind = row
        .get::<_, String>(4)?
        .parse()
        .map_err(|e| text_err(4, e))?;
    let metrics: Option<String> = row.get(12)?;
    let duration: Option<String> = row.get(13)?;
    Ok(StoredEvent {
        id: row.get(0)?,
        event: Event {
            platform,
            source_id: row.get(2)?,
            external_id: row.get(3)?,
            kind,
            title: row.get(5)?,
            description: row.get(6)?,
            start_at: from_ms(row.get(7)?),
            end_at: from_ms(row.get(8)?),
            published_at: from_ms(row.get(9)?),
            url: row.get(10)?,
            image_url: row.get(11)?,
            metrics: metrics.and_then(|m| EventMetrics::from_json(platform, &m)),
            duration: duration.and_then(|d| MediaDuration::parse_canonical(&d)),
        },
    })
}
