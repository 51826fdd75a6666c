//! Snapshot store: the on-disk tables plus the build marker.
//!
//! A snapshot directory holds one line-delimited JSON file per table and a
//! reserved marker file whose first line is `{_key: "_meta", buildNumber, releaseDate}`.
//! Refreshes are staged next to the directory and swapped in by rename, so the
//! marker never describes files that are not there.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::errors::AppError;
use crate::models::Build;

/// Reserved file holding the build marker.
pub const META_FILE: &str = "_sde.jsonl";

/// Extension of table files.
pub const TABLE_EXTENSION: &str = "jsonl";

/// One table file in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFile {
    /// Table name (file stem)
    pub name: String,
    pub file_name: String,
    pub path: PathBuf,
}

/// Handle on the snapshot directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// The build the snapshot was materialized from, if a readable marker exists.
    pub async fn local_build(&self) -> Result<Option<Build>, AppError> {
        let path = self.dir.join(META_FILE);
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut first_line = String::new();
        BufReader::new(file).read_line(&mut first_line).await?;

        match Build::from_jsonl(&first_line) {
            Ok(build) => Ok(Some(build)),
            Err(err) => {
                tracing::warn!("Ignoring unreadable build marker {:?}: {}", path, err);
                Ok(None)
            }
        }
    }

    /// All table files, sorted by name. The build marker is not a table.
    pub async fn tables(&self) -> Result<Vec<TableFile>, AppError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::SnapshotMissing(self.dir.clone()))
            }
            Err(err) => return Err(err.into()),
        };

        let mut tables = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_table = path.extension().and_then(|e| e.to_str()) == Some(TABLE_EXTENSION);
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !is_table || file_name == META_FILE || !entry.file_type().await?.is_file() {
                continue;
            }
            let name = file_name
                .trim_end_matches(TABLE_EXTENSION)
                .trim_end_matches('.')
                .to_string();
            tables.push(TableFile {
                name,
                file_name: file_name.to_string(),
                path,
            });
        }

        tables.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(tables)
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", table, TABLE_EXTENSION))
    }

    /// Open a table for a sequential scan.
    pub async fn open_table(&self, table: &str) -> Result<TableReader, AppError> {
        TableReader::open(&self.table_path(table)).await
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let name = self
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string());
        self.dir.with_file_name(format!(".{}.{}", name, suffix))
    }

    /// Move the snapshot back from the backup directory when a swap stopped
    /// between its two renames. Returns whether anything was restored.
    pub async fn recover_interrupted_swap(&self) -> Result<bool, AppError> {
        let previous = self.sibling("previous");
        if self.exists().await || fs::metadata(&previous).await.is_err() {
            return Ok(false);
        }

        tracing::warn!(
            "Restoring snapshot {:?} from the backup of an interrupted swap",
            self.dir
        );
        fs::rename(&previous, &self.dir).await?;
        Ok(true)
    }

    /// Fresh, empty staging directory next to the snapshot. Leftovers of an
    /// interrupted refresh are recovered or removed first.
    pub async fn begin_staging(&self) -> Result<PathBuf, AppError> {
        self.recover_interrupted_swap().await?;

        // With the snapshot in place, a backup is stale
        let staging = self.sibling("staging");
        remove_dir_if_exists(&staging).await?;
        remove_dir_if_exists(&self.sibling("previous")).await?;
        fs::create_dir_all(&staging).await?;
        Ok(staging)
    }

    /// Swap an extracted snapshot into place.
    ///
    /// `staged_root` is the directory holding the extracted tables, either
    /// `staging` itself or a folder inside it. Tables the archive did not
    /// contain are carried over from the current snapshot. Returns the number
    /// of carried tables.
    pub async fn commit_staging(
        &self,
        staging: &Path,
        staged_root: &Path,
    ) -> Result<usize, AppError> {
        let mut carried = 0;
        let previous = self.sibling("previous");
        self.recover_interrupted_swap().await?;
        remove_dir_if_exists(&previous).await?;

        if self.exists().await {
            for table in self.tables().await? {
                let target = staged_root.join(&table.file_name);
                if fs::metadata(&target).await.is_err() {
                    fs::copy(&table.path, &target).await?;
                    carried += 1;
                }
            }
            fs::rename(&self.dir, &previous).await?;
        }

        if let Err(err) = fs::rename(staged_root, &self.dir).await {
            tracing::error!("Snapshot swap failed, restoring previous snapshot: {}", err);
            if fs::metadata(&previous).await.is_ok() {
                if let Err(restore_err) = fs::rename(&previous, &self.dir).await {
                    tracing::error!(
                        "Could not restore snapshot from {:?}: {}",
                        previous,
                        restore_err
                    );
                }
            }
            return Err(err.into());
        }

        remove_dir_if_exists(&previous).await?;
        if staged_root != staging {
            remove_dir_if_exists(staging).await?;
        }

        tracing::info!(
            "Snapshot swapped into {:?} ({} tables carried over)",
            self.dir,
            carried
        );
        Ok(carried)
    }
}

/// Directory actually holding the tables of an extracted archive: the
/// extraction root, or its single subdirectory when the archive wraps its
/// tables in one folder.
pub fn staged_table_root(staging: &Path) -> Result<PathBuf, AppError> {
    let mut dirs = Vec::new();
    let mut has_tables = false;

    for entry in std::fs::read_dir(staging)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            dirs.push(path);
        } else if path.extension().and_then(|e| e.to_str()) == Some(TABLE_EXTENSION) {
            has_tables = true;
        }
    }

    if !has_tables && dirs.len() == 1 {
        return Ok(dirs.remove(0));
    }
    Ok(staging.to_path_buf())
}

async fn remove_dir_if_exists(path: &Path) -> Result<(), AppError> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Line-by-line reader over one table file.
pub struct TableReader {
    path: PathBuf,
    reader: BufReader<fs::File>,
    buf: Vec<u8>,
    line_number: usize,
}

impl TableReader {
    pub async fn open(path: &Path) -> Result<Self, AppError> {
        let file = match fs::File::open(path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::SnapshotMissing(path.to_path_buf()))
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            buf: Vec::new(),
            line_number: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 1-based number of the line last returned.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Next line without its terminator. Invalid UTF-8 is replaced rather
    /// than failing the scan.
    pub async fn next_line(&mut self) -> Result<Option<String>, AppError> {
        self.buf.clear();
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 {
            return Ok(None);
        }
        self.line_number += 1;

        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write(dir: &Path, name: &str, body: &str) {
        fs::create_dir_all(dir).await.unwrap();
        fs::write(dir.join(name), body).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_build_marker() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path().join("sde"));
        assert_eq!(store.local_build().await.unwrap(), None);

        write(
            store.dir(),
            META_FILE,
            "{\"_key\":\"_meta\",\"buildNumber\":3031812,\"releaseDate\":\"2025-10-07T11:05:12Z\"}\n",
        )
        .await;
        let build = store.local_build().await.unwrap().unwrap();
        assert_eq!(build.build_number, 3031812);

        write(store.dir(), META_FILE, "garbage\n").await;
        assert_eq!(store.local_build().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tables_skip_marker_and_other_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());
        write(store.dir(), "types.jsonl", "{}\n").await;
        write(store.dir(), "agents.jsonl", "{}\n").await;
        write(store.dir(), META_FILE, "{}\n").await;
        write(store.dir(), "readme.txt", "hi").await;

        let names: Vec<String> = store
            .tables()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["agents", "types"]);
    }

    #[tokio::test]
    async fn test_missing_snapshot_and_table() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path().join("absent"));

        assert!(!store.exists().await);
        assert!(matches!(store.tables().await, Err(AppError::SnapshotMissing(_))));
        assert!(matches!(
            store.open_table("types").await,
            Err(AppError::SnapshotMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_reader_strips_terminators() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());
        write(store.dir(), "types.jsonl", "{\"_key\":1}\r\n\n{\"_key\":2}").await;

        let mut reader = store.open_table("types").await.unwrap();
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("{\"_key\":1}"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("{\"_key\":2}"));
        assert_eq!(reader.line_number(), 3);
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_commit_staging_swaps_and_carries_tables() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path().join("sde"));
        write(store.dir(), "types.jsonl", "old types\n").await;
        write(store.dir(), "legacy.jsonl", "kept\n").await;

        let staging = store.begin_staging().await.unwrap();
        let wrapped = staging.join("eve-online-static-data");
        write(&wrapped, "types.jsonl", "new types\n").await;
        write(&wrapped, META_FILE, "{}\n").await;

        let root = staged_table_root(&staging).unwrap();
        assert_eq!(root, wrapped);

        let carried = store.commit_staging(&staging, &root).await.unwrap();
        assert_eq!(carried, 1);

        let types = fs::read_to_string(store.table_path("types")).await.unwrap();
        assert_eq!(types, "new types\n");
        let legacy = fs::read_to_string(store.table_path("legacy")).await.unwrap();
        assert_eq!(legacy, "kept\n");
        assert!(fs::metadata(&staging).await.is_err());
    }

    #[tokio::test]
    async fn test_begin_staging_restores_interrupted_swap() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path().join("sde"));
        let backup = temp_dir.path().join(".sde.previous");
        write(&backup, "types.jsonl", "old types\n").await;
        assert!(!store.exists().await);

        let staging = store.begin_staging().await.unwrap();
        assert!(fs::metadata(&staging).await.unwrap().is_dir());
        assert!(fs::metadata(&backup).await.is_err());

        let types = fs::read_to_string(store.table_path("types")).await.unwrap();
        assert_eq!(types, "old types\n");
        assert!(!store.recover_interrupted_swap().await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_backup_is_dropped_when_snapshot_exists() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path().join("sde"));
        write(store.dir(), "types.jsonl", "current\n").await;
        let backup = temp_dir.path().join(".sde.previous");
        write(&backup, "types.jsonl", "stale\n").await;

        assert!(!store.recover_interrupted_swap().await.unwrap());
        store.begin_staging().await.unwrap();

        assert!(fs::metadata(&backup).await.is_err());
        let types = fs::read_to_string(store.table_path("types")).await.unwrap();
        assert_eq!(types, "current\n");
    }
}
