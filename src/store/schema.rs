//! SQLite schema for sources, events, subscriptions and quota usage.
//!
//! All timestamps are stored as INTEGER unix milliseconds.

use rusqlite::{Connection, Result};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Create tables on a fresh database; no-op when already current.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current = get_schema_version(conn)?;
    if current == 0 {
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    }
    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform_id TEXT NOT NULL,
            external_id TEXT NOT NULL,
            handle TEXT,
            display_name TEXT,
            thumbnail_url TEXT,
            uploads_locator TEXT,
            last_fetched_at INTEGER,
            fetch_status TEXT NOT NULL DEFAULT 'pending',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (platform_id, external_id)
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform_id TEXT NOT NULL,
            source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
            external_event_id TEXT NOT NULL,
            type TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            start_at INTEGER,
            end_at INTEGER,
            published_at INTEGER,
            url TEXT NOT NULL,
            image_url TEXT,
            metrics_json TEXT,
            duration TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (platform_id, external_event_id),
            CHECK (start_at IS NOT NULL OR published_at IS NOT NULL)
        );

        -- Timeline order
        CREATE INDEX IF NOT EXISTS idx_events_order
            ON events(COALESCE(start_at, published_at) DESC, id ASC);
        CREATE INDEX IF NOT EXISTS idx_events_source ON events(source_id);
        -- Open lives for reconciliation and shadow dedup
        CREATE INDEX IF NOT EXISTS idx_events_live ON events(type, end_at);

        CREATE TABLE IF NOT EXISTS user_subscriptions (
            user_id TEXT NOT NULL,
            source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, source_id)
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_source ON user_subscriptions(source_id);

        CREATE TABLE IF NOT EXISTS api_quota_usage (
            date TEXT NOT NULL,
            platform_id TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            quota_cost INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (date, platform_id, endpoint)
        );
        "#,
    )?;

    Ok(())
}
