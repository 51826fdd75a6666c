//! Previously generated change logs.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;

use super::CHANGELOG_PREFIX;
use crate::errors::AppError;
use crate::models::{is_blank, ChangeLogEntry};
use crate::snapshot::TableReader;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogFile {
    pub name: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Change-log files in `dir`, newest release first.
pub async fn list_changelogs(dir: &Path) -> Result<Vec<ChangeLogFile>, AppError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_changelog_name(&name) {
            continue;
        }
        let metadata = entry.metadata().await?;
        files.push(ChangeLogFile {
            name,
            size: metadata.len(),
            modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    files.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(files)
}

/// Entries of one change-log file, in file order. Malformed lines are skipped.
pub async fn read_changelog(dir: &Path, name: &str) -> Result<Vec<ChangeLogEntry>, AppError> {
    if !is_changelog_name(name) || name.contains(['/', '\\']) {
        return Err(AppError::BadRequest(format!(
            "{:?} is not a change-log file name",
            name
        )));
    }

    let mut reader = match TableReader::open(&dir.join(name)).await {
        Ok(reader) => reader,
        Err(AppError::SnapshotMissing(_)) => {
            return Err(AppError::NotFound(format!("Change log {} not found", name)))
        }
        Err(err) => return Err(err),
    };

    let mut entries = Vec::new();
    while let Some(line) = reader.next_line().await? {
        if is_blank(&line) {
            continue;
        }
        match ChangeLogEntry::from_line(&line) {
            Ok(entry) => entries.push(entry),
            Err(err) => tracing::debug!("Skipping {}:{}: {}", name, reader.line_number(), err),
        }
    }
    Ok(entries)
}

fn is_changelog_name(name: &str) -> bool {
    name.starts_with(CHANGELOG_PREFIX) && name.ends_with(".jsonl")
}
