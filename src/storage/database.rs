//! SQLite database management with migrations
//!
//! Structured storage for source items, derived artifacts, and contexts.
//! The vector/keyword indexes are derived state; this database is the source
//! of truth for all full-text content.

use crate::error::{MemoraError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MemoraError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        // WAL for concurrent worker writes; foreign_keys is per-connection in
        // SQLite, so every pooled connection needs the pragmas
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| MemoraError::Config(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| MemoraError::Config(format!("Failed to get connection: {}", e)))
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let item_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;

        let artifact_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM artifacts", [], |row| row.get(0))?;

        let context_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM contexts", [], |row| row.get(0))?;

        let episode_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM contexts WHERE is_episode = 1",
            [],
            |row| row.get(0),
        )?;

        Ok(DbStats {
            item_count: item_count as usize,
            artifact_count: artifact_count as usize,
            context_count: context_count as usize,
            episode_count: episode_count as usize,
        })
    }
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub item_count: usize,
    pub artifact_count: usize,
    pub context_count: usize,
    pub episode_count: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Source items (one per ingested media unit)
    CREATE TABLE items (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        item_type TEXT NOT NULL,
        storage_ref TEXT NOT NULL,
        content_type TEXT NOT NULL,
        filename TEXT,
        content_hash TEXT NOT NULL,
        perceptual_hash INTEGER,
        captured_at INTEGER,
        tz_offset_minutes INTEGER,
        provider_captured_at INTEGER,
        received_at INTEGER NOT NULL,
        event_time INTEGER,
        event_time_source TEXT,
        event_time_confidence REAL,
        status TEXT NOT NULL,
        canonical_item_id TEXT,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX idx_items_user_hash ON items(user_id, content_hash);
    CREATE INDEX idx_items_user_event_time ON items(user_id, event_time);
    CREATE INDEX idx_items_user_created ON items(user_id, created_at);
    CREATE INDEX idx_items_status ON items(status);

    -- Derived artifacts (versioned step outputs; the UNIQUE constraint is the
    -- idempotency key, so racing workers resolve to one winning write)
    CREATE TABLE artifacts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        producer TEXT NOT NULL,
        producer_version INTEGER NOT NULL,
        fingerprint TEXT NOT NULL,
        status TEXT NOT NULL,
        payload TEXT,
        error TEXT,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE,
        UNIQUE (item_id, kind, producer, producer_version, fingerprint)
    );

    CREATE INDEX idx_artifacts_item ON artifacts(item_id);

    -- Processed contexts (retrievable memory units, including episodes and
    -- daily summaries)
    CREATE TABLE contexts (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        context_type TEXT NOT NULL,
        title TEXT NOT NULL,
        summary TEXT NOT NULL,
        keywords TEXT NOT NULL,
        entities TEXT NOT NULL,
        location TEXT,
        time_start INTEGER NOT NULL,
        time_end INTEGER NOT NULL,
        is_episode INTEGER NOT NULL DEFAULT 0,
        edited_by_user INTEGER NOT NULL DEFAULT 0,
        merge_count INTEGER NOT NULL DEFAULT 0,
        merged_from TEXT NOT NULL,
        embed_text TEXT NOT NULL,
        producer_versions TEXT NOT NULL,
        day TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX idx_contexts_user_type ON contexts(user_id, context_type);
    CREATE INDEX idx_contexts_user_time ON contexts(user_id, time_start);
    CREATE UNIQUE INDEX idx_contexts_daily ON contexts(user_id, day)
        WHERE context_type = 'daily_summary';

    -- Context membership (which items contributed to which context)
    CREATE TABLE context_items (
        context_id TEXT NOT NULL,
        item_id TEXT NOT NULL,
        PRIMARY KEY (context_id, item_id),
        FOREIGN KEY (context_id) REFERENCES contexts(id) ON DELETE CASCADE,
        FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_context_items_item ON context_items(item_id);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let _db = Database::new(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).unwrap();

        let conn = db.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();

        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_schema_exists() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).unwrap();
        let conn = db.get_conn().unwrap();

        let tables = vec!["items", "artifacts", "contexts", "context_items"];

        for table in tables {
            let count: i32 = conn
                .query_row(
                    &format!(
                        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='{}'",
                        table
                    ),
                    [],
                    |row| row.get(0),
                )
                .unwrap();

            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_artifact_idempotency_key() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).unwrap();
        let conn = db.get_conn().unwrap();

        conn.execute(
            "INSERT INTO items (id, user_id, item_type, storage_ref, content_type,
                                content_hash, received_at, status, created_at)
             VALUES ('i1', 'u1', 'photo', 'ref', 'image/jpeg', 'abc', 100, 'pending', 100)",
            [],
        )
        .unwrap();

        let insert = "INSERT OR IGNORE INTO artifacts
            (item_id, kind, producer, producer_version, fingerprint, status, created_at)
            VALUES ('i1', 'metadata', 'metadata', 1, 'fp1', 'ok', 100)";

        conn.execute(insert, []).unwrap();
        conn.execute(insert, []).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM artifacts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1, "Duplicate idempotency key must not add a row");
    }

    #[test]
    fn test_daily_summary_unique_per_user_day() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).unwrap();
        let conn = db.get_conn().unwrap();

        let insert = |id: &str| {
            conn.execute(
                "INSERT INTO contexts (id, user_id, context_type, title, summary, keywords,
                     entities, time_start, time_end, merged_from, embed_text,
                     producer_versions, day, created_at, updated_at)
                 VALUES (?1, 'u1', 'daily_summary', 't', 's', '[]', '[]', 0, 0, '[]', 't',
                     '{}', '2026-02-02', 0, 0)",
                params![id],
            )
        };

        insert("c1").unwrap();
        assert!(insert("c2").is_err(), "Second daily summary for same day must fail");
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).unwrap();
        let conn = db.get_conn().unwrap();

        let fk_enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();

        assert_eq!(fk_enabled, 1);
    }
}
