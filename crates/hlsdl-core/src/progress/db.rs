//! SQLite-backed progress store.
//!
//! Handles connection, migrations, and the record CRUD behind [`ProgressStore`].

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{ProgressRecord, ProgressStore, SegmentBitmap, StoreError};

/// Percent-encode a path for use in a sqlite:// URI.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Current time as Unix seconds (for DB timestamps).
fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Handle to the SQLite-backed progress database.
///
/// The database file is stored under the XDG state directory:
/// `~/.local/state/hlsdl/progress.db` on Debian.
#[derive(Clone)]
pub struct ResumeDb {
    pool: Pool<Sqlite>,
}

impl ResumeDb {
    /// Open (or create) the default progress database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("hlsdl")?;
        let state_dir = xdg_dirs.get_state_home().join("hlsdl");
        Self::open_at(state_dir.join("progress.db")).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await?;
        let db = ResumeDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        // One row per source URL; `downloaded_bitmap` holds one bit per segment.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS progress (
                source_url TEXT PRIMARY KEY,
                total_segments INTEGER NOT NULL,
                downloaded_bitmap BLOB NOT NULL DEFAULT x'',
                last_downloaded_index INTEGER,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> ProgressRecord {
    let total: i64 = row.get("total_segments");
    let total_segments = usize::try_from(total).unwrap_or(0);
    let bitmap: Vec<u8> = row.get("downloaded_bitmap");
    let last: Option<i64> = row.get("last_downloaded_index");
    ProgressRecord {
        total_segments,
        downloaded: SegmentBitmap::from_bytes(&bitmap, total_segments),
        last_downloaded_index: last.and_then(|i| usize::try_from(i).ok()),
    }
}

#[async_trait]
impl ProgressStore for ResumeDb {
    async fn get(&self, source_url: &str) -> Result<Option<ProgressRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT total_segments, downloaded_bitmap, last_downloaded_index
            FROM progress
            WHERE source_url = ?1
            "#,
        )
        .bind(source_url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(record_from_row))
    }

    async fn put(&self, source_url: &str, record: &ProgressRecord) -> Result<(), StoreError> {
        let blob = record.downloaded.to_bytes(record.total_segments);
        sqlx::query(
            r#"
            INSERT INTO progress
                (source_url, total_segments, downloaded_bitmap, last_downloaded_index, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(source_url) DO UPDATE SET
                total_segments = excluded.total_segments,
                downloaded_bitmap = excluded.downloaded_bitmap,
                last_downloaded_index = excluded.last_downloaded_index,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(source_url)
        .bind(record.total_segments as i64)
        .bind(blob)
        .bind(record.last_downloaded_index.map(|i| i as i64))
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, source_url: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM progress WHERE source_url = ?1")
            .bind(source_url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, ProgressRecord)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT source_url, total_segments, downloaded_bitmap, last_downloaded_index
            FROM progress
            ORDER BY updated_at DESC, source_url ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("source_url"), record_from_row(row)))
            .collect())
    }
}

#[cfg(test)]
/// Open an in-memory database for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<ResumeDb> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let db = ResumeDb { pool };
    db.migrate().await?;
    Ok(db)
}
