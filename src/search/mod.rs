//! Query engine: keyword search over the index store, or over the snapshot
//! files when no index has been built yet.

mod matcher;

pub use matcher::{matches_fuzzy, name_text, tokenize};

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::db::IndexRepository;
use crate::errors::AppError;
use crate::models::{is_blank, Record, SearchHit, SearchOutcome, SearchPath};
use crate::ops::{percent, EventSink};
use crate::snapshot::{SnapshotStore, TableReader};

pub struct QueryEngine {
    store: SnapshotStore,
    index_path: PathBuf,
}

impl QueryEngine {
    pub fn new(store: SnapshotStore, index_path: PathBuf) -> Self {
        Self { store, index_path }
    }

    /// Stream up to `limit` hits for `keyword` to `events`.
    ///
    /// The indexed path is used whenever a completed index exists. Cancellation
    /// is checked once per row or record; a cancelled search reports the
    /// matches seen so far.
    pub async fn search(
        &self,
        keyword: &str,
        limit: usize,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<SearchOutcome, AppError> {
        let tokens = tokenize(keyword);

        if let Some(repo) = IndexRepository::open_read_only(&self.index_path).await? {
            let result = self.search_index(&repo, &tokens, limit, cancel, events).await;
            repo.close().await;
            return result;
        }

        if !self.store.exists().await {
            return Err(AppError::QueryDataMissing(format!(
                "no index at {:?} and no snapshot at {:?}; run a sync first",
                self.index_path,
                self.store.dir()
            )));
        }
        self.search_snapshot(&tokens, limit, cancel, events, |hit| events.result(hit))
            .await
    }

    async fn search_index(
        &self,
        repo: &IndexRepository,
        tokens: &[String],
        limit: usize,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<SearchOutcome, AppError> {
        let mut outcome = SearchOutcome::empty(SearchPath::Indexed);
        if tokens.is_empty() {
            return Ok(outcome);
        }
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            return Ok(outcome);
        }

        tracing::debug!("Indexed search for {:?}", tokens);
        let page = repo
            .search(tokens, limit, cancel, |hit| events.result(hit))
            .await?;

        outcome.returned = page.returned;
        outcome.total = page.total;
        outcome.cancelled = page.cancelled;
        Ok(outcome)
    }

    /// Scan every table file. Slower than the index, same token semantics,
    /// with the subsequence rule as a second chance per token.
    async fn search_snapshot<F>(
        &self,
        tokens: &[String],
        limit: usize,
        cancel: &CancellationToken,
        events: &EventSink,
        mut on_hit: F,
    ) -> Result<SearchOutcome, AppError>
    where
        F: FnMut(SearchHit),
    {
        let mut outcome = SearchOutcome::empty(SearchPath::Fallback);
        if tokens.is_empty() {
            return Ok(outcome);
        }

        tracing::info!("No index available, scanning snapshot for {:?}", tokens);
        let tables = self.store.tables().await?;
        let total_files = tables.len();

        'tables: for (i, table) in tables.iter().enumerate() {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            events.progress(
                format!("Searching {} ({}/{})", table.file_name, i + 1, total_files),
                percent(i, total_files),
            );

            let mut reader = match TableReader::open(&table.path).await {
                Ok(reader) => reader,
                Err(AppError::SnapshotMissing(path)) => {
                    tracing::warn!("Table file vanished during search: {:?}", path);
                    continue;
                }
                Err(err) => return Err(err),
            };

            while let Some(line) = reader.next_line().await? {
                if cancel.is_cancelled() {
                    outcome.cancelled = true;
                    break 'tables;
                }
                if is_blank(&line) {
                    continue;
                }
                let Ok(record) = Record::parse(&line) else {
                    continue;
                };
                if !matches_fuzzy(tokens, &name_text(&record.name)) {
                    continue;
                }

                outcome.total += 1;
                if outcome.returned < limit {
                    on_hit(SearchHit::from_record(&table.name, &record, &line));
                    outcome.returned += 1;
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::IndexBuilder;
    use crate::ops::OperationEvent;
    use tempfile::TempDir;
    use tokio::fs;
    use tokio::sync::mpsc;

    struct Fixture {
        _temp_dir: TempDir,
        store: SnapshotStore,
        index_path: PathBuf,
    }

    async fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = temp_dir.path().join("snapshot");
        fs::create_dir_all(&snapshot).await.unwrap();
        fs::write(
            snapshot.join("types.jsonl"),
            concat!(
                "{\"_key\":34,\"name\":{\"en\":\"Tritanium\",\"zh\":\"三钛合金\"}}\n",
                "{\"_key\":35,\"name\":{\"en\":\"Tritanium\",\"zh\":\"三钛合金\"}}\n",
                "{\"_key\":41,\"name\":{\"en\":\"Improved Warding\",\"zh\":\"高级辟邪\"}}\n",
                "broken line\n",
            ),
        )
        .await
        .unwrap();

        Fixture {
            index_path: temp_dir.path().join("index.db"),
            store: SnapshotStore::new(snapshot),
            _temp_dir: temp_dir,
        }
    }

    async fn run(engine: &QueryEngine, keyword: &str, limit: usize) -> (Vec<SearchHit>, SearchOutcome) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = engine
            .search(keyword, limit, &CancellationToken::new(), &EventSink::new(tx))
            .await
            .unwrap();

        let mut hits = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let OperationEvent::Result { hit } = event {
                hits.push(hit);
            }
        }
        (hits, outcome)
    }

    async fn build_index(fx: &Fixture) {
        let repo = IndexRepository::open(&fx.index_path).await.unwrap();
        IndexBuilder::new(fx.store.clone(), 100)
            .rebuild(&repo, &EventSink::disabled())
            .await
            .unwrap();
        repo.close().await;
    }

    #[tokio::test]
    async fn test_indexed_search_uses_and_semantics() {
        let fx = fixture().await;
        build_index(&fx).await;
        let engine = QueryEngine::new(fx.store.clone(), fx.index_path.clone());

        let (hits, outcome) = run(&engine, "34 tritanium", 1000).await;
        assert_eq!(outcome.path, SearchPath::Indexed);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_deref(), Some("34"));

        // Substring only on the indexed path
        let (hits, _) = run(&engine, "高辟邪", 1000).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_search_without_index() {
        let fx = fixture().await;
        let engine = QueryEngine::new(fx.store.clone(), fx.index_path.clone());

        let (hits, outcome) = run(&engine, "高辟邪", 1000).await;
        assert_eq!(outcome.path, SearchPath::Fallback);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_deref(), Some("41"));
        assert_eq!(hits[0].source_table, "types");

        let (hits, outcome) = run(&engine, "tritanium", 1).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(outcome.returned, 1);
        assert_eq!(outcome.total, 2);
    }

    #[tokio::test]
    async fn test_empty_keyword_returns_nothing() {
        let fx = fixture().await;
        let engine = QueryEngine::new(fx.store.clone(), fx.index_path.clone());

        let (hits, outcome) = run(&engine, "   ", 1000).await;
        assert!(hits.is_empty());
        assert_eq!(outcome, SearchOutcome::empty(SearchPath::Fallback));
    }

    #[tokio::test]
    async fn test_missing_data_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let engine = QueryEngine::new(
            SnapshotStore::new(temp_dir.path().join("absent")),
            temp_dir.path().join("index.db"),
        );

        let err = engine
            .search("x", 10, &CancellationToken::new(), &EventSink::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QueryDataMissing(_)));
    }

    #[tokio::test]
    async fn test_fallback_cancelled_mid_scan_reports_partial_count() {
        let fx = fixture().await;
        let engine = QueryEngine::new(fx.store.clone(), fx.index_path.clone());
        let cancel = CancellationToken::new();
        let tokens = tokenize("tritanium");

        let mut hits = Vec::new();
        let outcome = engine
            .search_snapshot(&tokens, 1000, &cancel, &EventSink::disabled(), |hit| {
                hits.push(hit);
                cancel.cancel();
            })
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.returned, 1);
        assert_eq!(outcome.total, 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_deref(), Some("34"));
    }

    #[tokio::test]
    async fn test_cancelled_search_emits_nothing() {
        let fx = fixture().await;
        let engine = QueryEngine::new(fx.store.clone(), fx.index_path.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = engine
            .search("tritanium", 1000, &cancel, &EventSink::new(tx))
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.returned, 0);
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, OperationEvent::Result { .. }));
        }
    }
}
