//! Sync progress states and reports.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use super::change::ChangeCounts;

/// Steps of a sync run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStep {
    CheckVersion,
    RefreshSnapshot,
    ComputeChanges,
    Flush,
    Done,
}

impl SyncStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStep::CheckVersion => "checkVersion",
            SyncStep::RefreshSnapshot => "refreshSnapshot",
            SyncStep::ComputeChanges => "computeChanges",
            SyncStep::Flush => "flush",
            SyncStep::Done => "done",
        }
    }
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful sync.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub previous_build: Option<i64>,
    pub build_number: i64,
    pub release_date: String,
    pub snapshot_refreshed: bool,
    pub counts: ChangeCounts,
    /// Table lines that failed to parse while computing changes
    pub skipped_lines: usize,
    /// Manifest lines that failed to parse
    pub skipped_manifest_lines: usize,
    /// Tables named by the manifest but absent from the snapshot
    pub missing_tables: Vec<String>,
    pub changelog_path: PathBuf,
}

/// Outcome of a successful index rebuild.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    pub files: usize,
    pub rows: usize,
    /// Lines that failed to parse
    pub skipped_lines: usize,
    /// Parsed records without a resolvable id
    pub unindexed_records: usize,
    pub build_number: Option<i64>,
}
