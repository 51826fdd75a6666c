//! Change reconciler: brings the snapshot up to date and derives the
//! change log for the build transition.
//!
//! `sync()` walks CheckVersion → RefreshSnapshot → ComputeChanges → Flush → Done.
//! Any failure aborts the run and is reported with the step it happened in.

mod history;
mod writer;

pub use history::{list_changelogs, read_changelog, ChangeLogFile};
pub use writer::ChangeLogWriter;

use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::AppError;
use crate::manifest::ManifestClient;
use crate::models::{
    is_blank, Build, ChangeLogEntry, ChangeManifestEntry, Record, SyncReport, SyncStep, META_KEY,
};
use crate::ops::EventSink;
use crate::snapshot::SnapshotStore;

/// Prefix of every change-log file name.
pub const CHANGELOG_PREFIX: &str = "eve_sde_changes_";

/// File name of the change log for `build`.
pub fn changelog_file_name(build: &Build) -> String {
    format!("{}{}.jsonl", CHANGELOG_PREFIX, build.safe_release_date())
}

pub struct ChangeReconciler {
    client: Arc<ManifestClient>,
    store: SnapshotStore,
    changelog_dir: PathBuf,
}

/// Per-run tallies that do not end up in the change log.
#[derive(Default)]
struct ScanStats {
    skipped_lines: usize,
    missing_tables: Vec<String>,
}

impl ChangeReconciler {
    pub fn new(client: Arc<ManifestClient>, store: SnapshotStore, changelog_dir: PathBuf) -> Self {
        Self {
            client,
            store,
            changelog_dir,
        }
    }

    pub async fn sync(&self, events: &EventSink) -> Result<SyncReport, AppError> {
        let mut step = SyncStep::CheckVersion;
        match self.run(&mut step, events).await {
            Ok(report) => Ok(report),
            Err(err) => {
                tracing::error!("Sync failed during {}: {}", step, err);
                Err(AppError::Sync {
                    step,
                    source: Box::new(err),
                })
            }
        }
    }

    async fn run(&self, step: &mut SyncStep, events: &EventSink) -> Result<SyncReport, AppError> {
        tracing::info!("Sync step {}", step);
        events.progress("Checking latest build", None);
        self.store.recover_interrupted_swap().await?;
        let local = self.store.local_build().await?;
        let latest = self.client.latest_build().await?;
        let previous_build = local.as_ref().map(|b| b.build_number);

        let up_to_date = self.store.exists().await
            && previous_build == Some(latest.build_number);

        if up_to_date {
            events.progress(
                format!("Snapshot already at build {}", latest.build_number),
                None,
            );
        } else {
            *step = SyncStep::RefreshSnapshot;
            tracing::info!(
                "Sync step {}: local build {:?}, latest {}",
                step,
                previous_build,
                latest.build_number
            );
            events.progress(
                format!(
                    "New build {} found (local: {}), downloading",
                    latest.build_number,
                    previous_build.map_or_else(|| "none".to_string(), |b| b.to_string())
                ),
                None,
            );
            self.client.download_snapshot(&self.store, events).await?;
        }

        *step = SyncStep::ComputeChanges;
        tracing::info!("Sync step {} for build {}", step, latest.build_number);
        events.progress("Fetching change manifest", None);

        let path = self.changelog_dir.join(changelog_file_name(&latest));
        let mut writer = ChangeLogWriter::create(&self.changelog_dir, &path).await?;
        let mut manifest = self.client.change_manifest(&latest).await?;
        let mut stats = ScanStats::default();

        while let Some(entry) = manifest.next_entry().await? {
            self.reconcile_entry(&entry, &mut writer, &mut stats, events)
                .await?;
        }

        if manifest.meta().is_none() {
            tracing::warn!(
                "Change manifest for build {} has no {} line",
                latest.build_number,
                META_KEY
            );
        }

        *step = SyncStep::Flush;
        tracing::info!("Sync step {}", step);
        let counts = writer.commit().await?;

        *step = SyncStep::Done;
        events.progress(
            format!(
                "Change log saved to {} (added {}, changed {}, removed {})",
                path.display(),
                counts.added,
                counts.changed,
                counts.removed
            ),
            Some(100),
        );
        tracing::info!(
            "Sync done for build {}: {} changes, {} skipped lines",
            latest.build_number,
            counts.total(),
            stats.skipped_lines
        );

        Ok(SyncReport {
            previous_build,
            build_number: latest.build_number,
            release_date: latest.release_date,
            snapshot_refreshed: !up_to_date,
            counts,
            skipped_lines: stats.skipped_lines,
            skipped_manifest_lines: manifest.skipped(),
            missing_tables: stats.missing_tables,
            changelog_path: path,
        })
    }

    /// Emit the change-log entries of one table.
    ///
    /// Removed ids need no file access. Added and changed ids are resolved
    /// in a single pass over the post-update table file.
    async fn reconcile_entry(
        &self,
        entry: &ChangeManifestEntry,
        writer: &mut ChangeLogWriter,
        stats: &mut ScanStats,
        events: &EventSink,
    ) -> Result<(), AppError> {
        if entry.is_empty() {
            return Ok(());
        }

        let mut message = format!(
            "Processing changes: {} (added {}, changed {}, removed {})",
            entry.table,
            entry.added.len(),
            entry.changed.len(),
            entry.removed.len()
        );
        if entry.file_added {
            message.push_str(" [new table]");
        }
        events.progress(message, None);

        for id in &entry.removed {
            writer.append(&ChangeLogEntry::removed(&entry.table, id)).await?;
        }

        if !entry.needs_scan() {
            return Ok(());
        }

        let mut reader = match self.store.open_table(&entry.table).await {
            Ok(reader) => reader,
            Err(AppError::SnapshotMissing(path)) => {
                tracing::warn!(
                    "Table {} listed in the change manifest is missing at {:?}",
                    entry.table,
                    path
                );
                stats.missing_tables.push(entry.table.clone());
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        while let Some(line) = reader.next_line().await? {
            if is_blank(&line) {
                continue;
            }
            let record = match Record::parse(&line) {
                Ok(record) => record,
                Err(err) => {
                    stats.skipped_lines += 1;
                    tracing::debug!(
                        "Skipping {}:{}: {}",
                        reader.path().display(),
                        reader.line_number(),
                        err
                    );
                    continue;
                }
            };

            if let Some(status) = entry.classify(record.id.as_ref()) {
                writer
                    .append(&ChangeLogEntry::from_record(&entry.table, status, record))
                    .await?;
            }
        }

        Ok(())
    }
}
