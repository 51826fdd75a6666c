//! Index builder: repopulates the index store from the snapshot.

use crate::db::IndexRepository;
use crate::errors::AppError;
use crate::models::{is_blank, IndexReport, IndexRow, Record};
use crate::ops::{percent, EventSink};
use crate::snapshot::{SnapshotStore, TableReader};

pub struct IndexBuilder {
    store: SnapshotStore,
    batch_size: usize,
}

impl IndexBuilder {
    pub fn new(store: SnapshotStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Clear the index and insert one row per identifiable record of every
    /// table. Rows and the completion marker are committed together, so a
    /// failed rebuild leaves an empty index rather than a partial one.
    pub async fn rebuild(
        &self,
        repo: &IndexRepository,
        events: &EventSink,
    ) -> Result<IndexReport, AppError> {
        self.run(repo, events).await.map_err(|err| {
            tracing::error!("Index rebuild failed: {}", err);
            err.into_index_build()
        })
    }

    async fn run(&self, repo: &IndexRepository, events: &EventSink) -> Result<IndexReport, AppError> {
        events.progress("Clearing index", None);
        repo.clear().await?;

        let tables = self.store.tables().await?;
        let build = self.store.local_build().await?;
        let total = tables.len();
        tracing::info!("Indexing {} tables from {:?}", total, self.store.dir());

        let mut report = IndexReport {
            files: total,
            rows: 0,
            skipped_lines: 0,
            unindexed_records: 0,
            build_number: build.as_ref().map(|b| b.build_number),
        };

        let mut tx = repo.begin().await?;
        let mut batch: Vec<IndexRow> = Vec::with_capacity(self.batch_size);

        for (i, table) in tables.iter().enumerate() {
            let mut reader = TableReader::open(&table.path).await?;

            while let Some(line) = reader.next_line().await? {
                if is_blank(&line) {
                    continue;
                }
                let record = match Record::parse(&line) {
                    Ok(record) => record,
                    Err(err) => {
                        report.skipped_lines += 1;
                        tracing::debug!(
                            "Skipping {}:{}: {}",
                            table.file_name,
                            reader.line_number(),
                            err
                        );
                        continue;
                    }
                };

                match IndexRow::from_record(&table.name, &record, &line) {
                    Some(row) => batch.push(row),
                    None => report.unindexed_records += 1,
                }

                if batch.len() >= self.batch_size {
                    IndexRepository::insert_batch(&mut tx, &batch).await?;
                    report.rows += batch.len();
                    batch.clear();
                }
            }

            // Flush at end of file
            IndexRepository::insert_batch(&mut tx, &batch).await?;
            report.rows += batch.len();
            batch.clear();

            events.progress(
                format!("Indexed {} ({}/{})", table.file_name, i + 1, total),
                percent(i + 1, total),
            );
        }

        IndexRepository::write_meta(&mut tx, build.as_ref(), report.rows).await?;
        tx.commit().await?;

        tracing::info!(
            "Index rebuilt: {} rows from {} files ({} skipped lines, {} records without id)",
            report.rows,
            report.files,
            report.skipped_lines,
            report.unindexed_records
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::OperationEvent;
    use tempfile::TempDir;
    use tokio::fs;
    use tokio::sync::mpsc;

    async fn write_snapshot(dir: &std::path::Path) {
        fs::create_dir_all(dir).await.unwrap();
        fs::write(
            dir.join("_sde.jsonl"),
            "{\"_key\":\"_meta\",\"buildNumber\":3031812,\"releaseDate\":\"2025-10-07T11:05:12Z\"}\n",
        )
        .await
        .unwrap();
        fs::write(
            dir.join("types.jsonl"),
            concat!(
                "{\"_key\":34,\"name\":{\"en\":\"Tritanium\",\"zh\":\"三钛合金\"}}\n",
                "{\"_key\":35,\"name\":{\"en\":\"Pyerite\"}}\n",
                "not json\n",
                "\n",
                "{\"name\":\"no id\"}\n",
                "{\"_key\":36,\"name\":\"Mexallon\"}\n",
            ),
        )
        .await
        .unwrap();
        fs::write(
            dir.join("groups.jsonl"),
            "{\"_key\":18,\"name\":{\"en\":\"Mineral\",\"zh\":\"矿物\"}}\n",
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_rebuild_indexes_every_table() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = temp_dir.path().join("snapshot");
        write_snapshot(&snapshot).await;

        let repo = IndexRepository::open(&temp_dir.path().join("index.db")).await.unwrap();
        let builder = IndexBuilder::new(SnapshotStore::new(&snapshot), 2);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let report = builder.rebuild(&repo, &EventSink::new(tx)).await.unwrap();

        assert_eq!(report.files, 2);
        assert_eq!(report.rows, 4);
        assert_eq!(report.skipped_lines, 1);
        assert_eq!(report.unindexed_records, 1);
        assert_eq!(report.build_number, Some(3031812));
        assert_eq!(repo.count().await.unwrap(), 4);
        assert_eq!(repo.meta().await.unwrap().unwrap().build_number, Some(3031812));
        assert_eq!(repo.lookup_name("36").await.unwrap().as_deref(), Some("Mexallon"));

        let mut messages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let OperationEvent::Progress { message, percent } = event {
                messages.push((message, percent));
            }
        }
        assert!(messages.contains(&("Indexed groups.jsonl (1/2)".to_string(), Some(50))));
        assert!(messages.contains(&("Indexed types.jsonl (2/2)".to_string(), Some(100))));
    }

    #[tokio::test]
    async fn test_rebuild_drops_stale_rows() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = temp_dir.path().join("snapshot");
        write_snapshot(&snapshot).await;

        let repo = IndexRepository::open(&temp_dir.path().join("index.db")).await.unwrap();
        let builder = IndexBuilder::new(SnapshotStore::new(&snapshot), 1000);
        builder.rebuild(&repo, &EventSink::disabled()).await.unwrap();
        assert!(repo.lookup_name("35").await.unwrap().is_some());

        fs::write(
            snapshot.join("types.jsonl"),
            "{\"_key\":34,\"name\":{\"en\":\"Tritanium\"}}\n",
        )
        .await
        .unwrap();
        builder.rebuild(&repo, &EventSink::disabled()).await.unwrap();

        assert!(repo.lookup_name("35").await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_index_build_error() {
        let temp_dir = TempDir::new().unwrap();
        let repo = IndexRepository::open(&temp_dir.path().join("index.db")).await.unwrap();
        let builder = IndexBuilder::new(SnapshotStore::new(temp_dir.path().join("absent")), 10);

        let err = builder.rebuild(&repo, &EventSink::disabled()).await.unwrap_err();
        assert!(matches!(err, AppError::IndexBuild(_)));
        assert!(repo.meta().await.unwrap().is_none());
    }
}
