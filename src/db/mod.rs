//! Index store: SQLite rows derived from the snapshot.
//!
//! The index is a disposable cache. It is rebuilt from the snapshot in full
//! and never holds anything the snapshot does not.

mod repository;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Open (creating if needed) the index database and run migrations.
pub async fn init_index_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Open an existing index database for queries only. Returns `None` when the
/// file does not exist.
pub async fn open_index_read_only(db_path: &Path) -> Result<Option<SqlitePool>, sqlx::Error> {
    if tokio::fs::metadata(db_path).await.is_err() {
        return Ok(None);
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(false)
        .pragma("query_only", "ON")
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await?;

    Ok(Some(pool))
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT NOT NULL,
            source_table TEXT NOT NULL,
            name_zh TEXT NOT NULL,
            name_en TEXT NOT NULL,
            search_text TEXT NOT NULL,
            json_data TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Written in the same transaction as the last batch of a rebuild; its
    // presence marks a complete index.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            build_number INTEGER,
            release_date TEXT,
            row_count INTEGER NOT NULL,
            built_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_items_id ON items(id);
        CREATE INDEX IF NOT EXISTS idx_items_name_zh ON items(name_zh);
        CREATE INDEX IF NOT EXISTS idx_items_name_en ON items(name_en);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
