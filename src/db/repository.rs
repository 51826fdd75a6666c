//! Index store queries.
//!
//! Every search token is matched with `instr()`, so `%` and `_` in user input
//! are plain characters and matching is an exact substring test.

use std::path::Path;

use chrono::Utc;
use futures::TryStreamExt;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use tokio_util::sync::CancellationToken;

use super::{init_index_database, open_index_read_only};
use crate::errors::AppError;
use crate::models::{Build, IndexRow, LocalizedName, SearchHit};

/// Metadata of the last completed rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMeta {
    pub build_number: Option<i64>,
    pub release_date: Option<String>,
    pub row_count: i64,
    pub built_at: String,
}

/// Result of an indexed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedPage {
    pub returned: usize,
    pub total: usize,
    pub cancelled: bool,
}

/// Repository over the `items` and `index_meta` tables.
#[derive(Clone)]
pub struct IndexRepository {
    pool: SqlitePool,
}

impl IndexRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the index for writing, creating the database when needed.
    pub async fn open(path: &Path) -> Result<Self, AppError> {
        Ok(Self::new(init_index_database(path).await?))
    }

    /// Open the index for queries. `None` when no completed index exists:
    /// the file is missing, has no schema yet or was never fully built.
    pub async fn open_read_only(path: &Path) -> Result<Option<Self>, AppError> {
        let Some(pool) = open_index_read_only(path).await? else {
            return Ok(None);
        };

        let marker = sqlx::query("SELECT 1 FROM index_meta WHERE id = 1")
            .fetch_optional(&pool)
            .await;
        match marker {
            Ok(Some(_)) => Ok(Some(Self::new(pool))),
            Ok(None) => {
                pool.close().await;
                Ok(None)
            }
            Err(sqlx::Error::Database(err)) => {
                tracing::debug!("Index at {:?} has no schema: {}", path, err);
                pool.close().await;
                Ok(None)
            }
            Err(err) => {
                pool.close().await;
                Err(err.into())
            }
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Delete every row and reclaim the space.
    pub async fn clear(&self) -> Result<(), AppError> {
        sqlx::query("DELETE FROM items").execute(&self.pool).await?;
        sqlx::query("DELETE FROM index_meta")
            .execute(&self.pool)
            .await?;
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, AppError> {
        Ok(self.pool.begin().await?)
    }

    /// Insert one batch of rows with a single statement.
    pub async fn insert_batch(conn: &mut SqliteConnection, rows: &[IndexRow]) -> Result<(), AppError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "INSERT INTO items (id, source_table, name_zh, name_en, search_text, json_data) ",
        );
        query.push_values(rows, |mut values, row| {
            values
                .push_bind(row.id.clone())
                .push_bind(row.source_table.clone())
                .push_bind(row.name_zh.clone())
                .push_bind(row.name_en.clone())
                .push_bind(row.search_text.clone())
                .push_bind(row.json_data.clone());
        });
        query.build().execute(&mut *conn).await?;
        Ok(())
    }

    /// Record a completed rebuild. Written inside the rebuild transaction.
    pub async fn write_meta(
        conn: &mut SqliteConnection,
        build: Option<&Build>,
        row_count: usize,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT OR REPLACE INTO index_meta (id, build_number, release_date, row_count, built_at) VALUES (1, ?, ?, ?, ?)",
        )
        .bind(build.map(|b| b.build_number))
        .bind(build.map(|b| b.release_date.clone()))
        .bind(row_count as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn meta(&self) -> Result<Option<IndexMeta>, AppError> {
        let row = sqlx::query(
            "SELECT build_number, release_date, row_count, built_at FROM index_meta WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(meta_from_row))
    }

    pub async fn count(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Display name of the first row with this id, Chinese first.
    pub async fn lookup_name(&self, id: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT name_zh, name_en FROM items WHERE id = ? ORDER BY rowid LIMIT 1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row
            .as_ref()
            .map(name_from_row)
            .and_then(|name| name.display().map(str::to_string)))
    }

    /// Stream rows whose search text contains every token, in insertion
    /// order, up to `limit`. The full match count is only queried when the
    /// limit was reached.
    pub async fn search<F>(
        &self,
        tokens: &[String],
        limit: usize,
        cancel: &CancellationToken,
        mut on_hit: F,
    ) -> Result<IndexedPage, AppError>
    where
        F: FnMut(SearchHit),
    {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT id, source_table, name_zh, name_en, json_data FROM items",
        );
        push_token_filter(&mut query, tokens);
        query.push(" ORDER BY rowid LIMIT ").push_bind(limit as i64);

        let mut returned = 0;
        let mut cancelled = false;
        {
            let mut rows = query.build().fetch(&self.pool);
            while let Some(row) = rows.try_next().await? {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                on_hit(hit_from_row(&row));
                returned += 1;
            }
        }

        let total = if cancelled || returned < limit {
            returned
        } else {
            self.count_matches(tokens).await?
        };

        Ok(IndexedPage {
            returned,
            total,
            cancelled,
        })
    }

    async fn count_matches(&self, tokens: &[String]) -> Result<usize, AppError> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM items");
        push_token_filter(&mut query, tokens);
        let total: i64 = query.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(total.max(0) as usize)
    }
}

fn push_token_filter(query: &mut QueryBuilder<'_, Sqlite>, tokens: &[String]) {
    for (i, token) in tokens.iter().enumerate() {
        query.push(if i == 0 { " WHERE " } else { " AND " });
        query
            .push("instr(search_text, ")
            .push_bind(token.clone())
            .push(") > 0");
    }
}

// ==================== HELPER FUNCTIONS ====================

fn meta_from_row(row: &SqliteRow) -> IndexMeta {
    IndexMeta {
        build_number: row.get("build_number"),
        release_date: row.get("release_date"),
        row_count: row.get("row_count"),
        built_at: row.get("built_at"),
    }
}

fn name_from_row(row: &SqliteRow) -> LocalizedName {
    LocalizedName {
        zh: row.get("name_zh"),
        en: row.get("name_en"),
    }
}

fn hit_from_row(row: &SqliteRow) -> SearchHit {
    SearchHit {
        source_table: row.get("source_table"),
        id: Some(row.get("id")),
        name_zh: row.get("name_zh"),
        name_en: row.get("name_en"),
        payload: row.get("json_data"),
    }
}
