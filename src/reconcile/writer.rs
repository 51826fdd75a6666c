//! Change-log output file.

use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::errors::AppError;
use crate::models::{ChangeCounts, ChangeLogEntry};

/// Writes change-log entries in emission order to a temporary file in the
/// target directory, and renames it over the final path on commit. Dropping
/// an uncommitted writer removes the temporary file, so an aborted run never
/// leaves a half-written change log behind.
pub struct ChangeLogWriter {
    temp: NamedTempFile,
    out: BufWriter<fs::File>,
    path: PathBuf,
    counts: ChangeCounts,
}

impl ChangeLogWriter {
    pub async fn create(dir: &Path, path: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(dir).await?;
        let temp = tempfile::Builder::new()
            .prefix(".changes-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        let out = BufWriter::new(fs::File::from_std(temp.reopen()?));

        Ok(Self {
            temp,
            out,
            path: path.to_path_buf(),
            counts: ChangeCounts::default(),
        })
    }

    pub async fn append(&mut self, entry: &ChangeLogEntry) -> Result<(), AppError> {
        let mut line = entry.to_line()?;
        line.push('\n');
        self.out.write_all(line.as_bytes()).await?;
        self.counts.record(entry.status);
        Ok(())
    }

    /// Flush and atomically replace the change log at the final path.
    pub async fn commit(self) -> Result<ChangeCounts, AppError> {
        let Self {
            temp,
            mut out,
            path,
            counts,
        } = self;

        out.flush().await?;
        out.get_ref().sync_all().await?;
        drop(out);

        temp.persist(&path)
            .map_err(|e| AppError::Io(format!("cannot write {:?}: {}", path, e.error)))?;
        Ok(counts)
    }
}
