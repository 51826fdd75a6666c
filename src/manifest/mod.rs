//! Manifest client: build metadata, change manifests and snapshot archives
//! from the dataset publisher.
//!
//! Stateless apart from the HTTP connection pool. Every request carries a
//! timeout, and idempotent requests go through [`retry::with_retry`].

mod retry;

pub use retry::{with_retry, RetryPolicy};

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, Response};
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::{Build, ChangeManifestEntry, META_KEY};
use crate::ops::{percent, EventSink};
use crate::snapshot::{staged_table_root, SnapshotStore, META_FILE};

/// HTTP client for the publisher endpoints.
#[derive(Debug, Clone)]
pub struct ManifestClient {
    http: Client,
    config: Config,
    retry: RetryPolicy,
}

impl ManifestClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let http = Client::builder()
            .connect_timeout(config.request_timeout)
            .user_agent(concat!("sde-mirror/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            config: config.clone(),
            retry: RetryPolicy::from_config(config),
        })
    }

    /// Fetch and parse the publisher's latest build descriptor.
    pub async fn latest_build(&self) -> Result<Build, AppError> {
        let url = &self.config.latest_url;
        with_retry(self.retry, "fetch latest build", || async {
            let body = self.get(url, self.config.request_timeout).await?.text().await?;
            Build::from_jsonl(&body)
        })
        .await
    }

    /// Open the change manifest for `build` as a stream of entries.
    pub async fn change_manifest(&self, build: &Build) -> Result<ChangeManifestStream, AppError> {
        let url = self.config.changes_url_for(build.build_number);
        let response = with_retry(self.retry, "fetch change manifest", || {
            self.get(&url, self.config.request_timeout)
        })
        .await?;

        Ok(ChangeManifestStream::new(response, build.build_number))
    }

    /// Download the full archive and swap it into `destination`.
    ///
    /// The archive is extracted into a staging directory first; the current
    /// snapshot is only replaced once extraction finished.
    pub async fn download_snapshot(
        &self,
        destination: &SnapshotStore,
        events: &EventSink,
    ) -> Result<(), AppError> {
        let scratch_dir = scratch_dir_for(destination.dir());
        fs::create_dir_all(&scratch_dir).await?;

        let archive = with_retry(self.retry, "download snapshot archive", || {
            self.fetch_archive(&scratch_dir, events)
        })
        .await?;

        events.progress("Extracting snapshot archive", None);
        let staging = destination.begin_staging().await?;
        let target = staging.clone();
        let extracted = tokio::task::spawn_blocking(move || -> Result<(usize, PathBuf), AppError> {
            let files = extract_archive(archive.path(), &target)?;
            let root = staged_table_root(&target)?;
            Ok((files, root))
        })
        .await
        .map_err(AppError::from)
        .and_then(|result| result);

        let (files, root) = match extracted {
            Ok(extracted) => extracted,
            Err(err) => {
                let _ = fs::remove_dir_all(&staging).await;
                return Err(err);
            }
        };

        if fs::metadata(root.join(META_FILE)).await.is_err() {
            tracing::warn!("Snapshot archive has no {} build marker", META_FILE);
        }

        destination.commit_staging(&staging, &root).await?;
        events.progress(format!("Snapshot updated ({} files extracted)", files), Some(100));
        Ok(())
    }

    async fn fetch_archive(
        &self,
        scratch_dir: &Path,
        events: &EventSink,
    ) -> Result<tempfile::NamedTempFile, AppError> {
        let mut response = self
            .get(&self.config.archive_url, self.config.download_timeout)
            .await?;
        let total = response.content_length();

        let archive = tempfile::Builder::new()
            .prefix(".sde-archive-")
            .suffix(".zip")
            .tempfile_in(scratch_dir)?;
        let mut file = fs::File::from_std(archive.reopen()?);

        let mut downloaded: u64 = 0;
        let mut last_percent = None;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            let pct = total.and_then(|t| percent(downloaded as usize, t as usize));
            if pct != last_percent {
                last_percent = pct;
                events.progress(
                    format!("Downloading snapshot archive ({} KiB)", downloaded / 1024),
                    pct,
                );
            }
        }
        file.flush().await?;
        file.sync_all().await?;

        tracing::info!("Downloaded snapshot archive ({} bytes)", downloaded);
        Ok(archive)
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<Response, AppError> {
        let response = self.http.get(url).timeout(timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Network(format!("{} returned {}", url, status)));
        }
        Ok(response)
    }
}

/// Directory for the downloaded archive: next to the snapshot, so large
/// archives do not land on a small temp filesystem.
fn scratch_dir_for(snapshot_dir: &Path) -> PathBuf {
    snapshot_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Extract every entry of a zip archive below `target`.
fn extract_archive(archive: &Path, target: &Path) -> Result<usize, AppError> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;
    let mut files = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(AppError::Io(format!(
                "archive entry {:?} escapes the extraction directory",
                entry.name()
            )));
        };
        let out_path = target.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;
        files += 1;
    }

    Ok(files)
}

/// One parsed line of a change manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLine {
    Blank,
    Meta(Build),
    Entry(ChangeManifestEntry),
}

pub fn parse_manifest_line(line: &str) -> Result<ManifestLine, AppError> {
    if line.trim().is_empty() {
        return Ok(ManifestLine::Blank);
    }
    let value: Value = serde_json::from_str(line)
        .map_err(|e| AppError::ManifestFormat(format!("invalid JSON: {}", e)))?;

    if value.get("_key").and_then(Value::as_str) == Some(META_KEY) {
        return Build::from_value(&value).map(ManifestLine::Meta);
    }
    ChangeManifestEntry::from_value(&value).map(ManifestLine::Entry)
}

/// Pull-based stream over a line-delimited change manifest.
///
/// The `_meta` line is consumed internally and lines that fail to parse are
/// skipped and counted.
pub struct ChangeManifestStream {
    response: Response,
    build_number: i64,
    buffer: Vec<u8>,
    finished: bool,
    meta: Option<Build>,
    skipped: usize,
}

impl ChangeManifestStream {
    fn new(response: Response, build_number: i64) -> Self {
        Self {
            response,
            build_number,
            buffer: Vec::new(),
            finished: false,
            meta: None,
            skipped: 0,
        }
    }

    /// Build metadata from the `_meta` line, once it has been read.
    pub fn meta(&self) -> Option<&Build> {
        self.meta.as_ref()
    }

    /// Lines skipped because they failed to parse.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub async fn next_entry(&mut self) -> Result<Option<ChangeManifestEntry>, AppError> {
        while let Some(line) = self.next_line().await? {
            match parse_manifest_line(&line) {
                Ok(ManifestLine::Entry(entry)) => return Ok(Some(entry)),
                Ok(ManifestLine::Blank) => {}
                Ok(ManifestLine::Meta(meta)) => {
                    if meta.build_number != self.build_number {
                        tracing::warn!(
                            "Change manifest for build {} reports build {}",
                            self.build_number,
                            meta.build_number
                        );
                    }
                    tracing::info!(
                        "Change manifest build {} released {}",
                        meta.build_number,
                        meta.release_date
                    );
                    self.meta = Some(meta);
                }
                Err(err) => {
                    self.skipped += 1;
                    tracing::debug!("Skipping change manifest line: {}", err);
                }
            }
        }
        Ok(None)
    }

    async fn next_line(&mut self) -> Result<Option<String>, AppError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let rest = self.buffer.split_off(pos + 1);
                let line = std::mem::replace(&mut self.buffer, rest);
                return Ok(Some(String::from_utf8_lossy(&line[..pos]).into_owned()));
            }

            if self.finished {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.buffer);
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            match self.response.chunk().await? {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => self.finished = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest_lines() {
        assert_eq!(parse_manifest_line("  ").unwrap(), ManifestLine::Blank);

        let meta = parse_manifest_line(
            r#"{"_key":"_meta","buildNumber":3031812,"releaseDate":"2025-10-07T11:05:12Z"}"#,
        )
        .unwrap();
        assert!(matches!(meta, ManifestLine::Meta(b) if b.build_number == 3031812));

        let entry =
            parse_manifest_line(r#"{"_key":"types","added":[1],"changed":[2],"removed":[3]}"#)
                .unwrap();
        match entry {
            ManifestLine::Entry(e) => {
                assert_eq!(e.table, "types");
                assert_eq!(e.added.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(parse_manifest_line("{oops").is_err());
    }

    #[test]
    fn test_scratch_dir() {
        assert_eq!(
            scratch_dir_for(Path::new("./data/eve_sde_jsonl")),
            PathBuf::from("./data")
        );
        assert_eq!(scratch_dir_for(Path::new("eve_sde_jsonl")), PathBuf::from("."));
    }
}
