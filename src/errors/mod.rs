//! Error handling module for the SDE mirror.
//!
//! One error type covers the whole pipeline. Every variant maps to a stable
//! code (reported to the collaborator as the error kind) and to an HTTP status.

use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::SyncStep;

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const MANIFEST_FORMAT_ERROR: &str = "MANIFEST_FORMAT_ERROR";
    pub const SNAPSHOT_MISSING: &str = "SNAPSHOT_MISSING";
    pub const RECORD_PARSE_ERROR: &str = "RECORD_PARSE_ERROR";
    pub const INDEX_BUILD_ERROR: &str = "INDEX_BUILD_ERROR";
    pub const QUERY_DATA_MISSING: &str = "QUERY_DATA_MISSING";
    pub const BUSY: &str = "BUSY";
    pub const IO_ERROR: &str = "IO_ERROR";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Transport failure or timeout talking to the publisher
    #[error("network error: {0}")]
    Network(String),
    /// A manifest response is missing a required field or is malformed
    #[error("manifest format error: {0}")]
    ManifestFormat(String),
    /// An expected snapshot file or directory is absent
    #[error("snapshot file missing: {}", .0.display())]
    SnapshotMissing(PathBuf),
    /// A single line failed to parse; callers skip it
    #[error("record parse error: {0}")]
    RecordParse(String),
    /// Enumerating the snapshot or writing the index store failed
    #[error("index build error: {0}")]
    IndexBuild(String),
    /// Search invoked before any snapshot or index exists
    #[error("query data missing: {0}")]
    QueryDataMissing(String),
    /// A conflicting write operation is already running
    #[error("operation busy: {0}")]
    Busy(String),
    /// A sync aborted at the given step
    #[error("sync failed during {step}: {source}")]
    Sync {
        step: SyncStep,
        source: Box<AppError>,
    },
    #[error("io error: {0}")]
    Io(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Network(_) | AppError::ManifestFormat(_) => StatusCode::BAD_GATEWAY,
            AppError::SnapshotMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::RecordParse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::IndexBuild(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::QueryDataMissing(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Busy(_) => StatusCode::CONFLICT,
            AppError::Sync { source, .. } => source.status_code(),
            AppError::Io(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Network(_) => codes::NETWORK_ERROR,
            AppError::ManifestFormat(_) => codes::MANIFEST_FORMAT_ERROR,
            AppError::SnapshotMissing(_) => codes::SNAPSHOT_MISSING,
            AppError::RecordParse(_) => codes::RECORD_PARSE_ERROR,
            AppError::IndexBuild(_) => codes::INDEX_BUILD_ERROR,
            AppError::QueryDataMissing(_) => codes::QUERY_DATA_MISSING,
            AppError::Busy(_) => codes::BUSY,
            AppError::Sync { source, .. } => source.error_code(),
            AppError::Io(_) => codes::IO_ERROR,
            AppError::Database(_) => codes::DATABASE_ERROR,
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::BadRequest(_) => codes::BAD_REQUEST,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Transient failures worth another attempt.
    pub fn is_retriable(&self) -> bool {
        matches!(self, AppError::Network(_))
    }

    /// Re-tag a storage failure as fatal to an index rebuild.
    pub fn into_index_build(self) -> AppError {
        match self {
            AppError::IndexBuild(_) => self,
            other => AppError::IndexBuild(other.to_string()),
        }
    }

    /// Structured context attached to the response envelope.
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Sync { step, source } => {
                let mut details = serde_json::json!({ "step": step });
                if let Some(inner) = source.details() {
                    details["cause"] = inner;
                }
                Some(details)
            }
            AppError::SnapshotMissing(path) => {
                Some(serde_json::json!({ "path": path.display().to_string() }))
            }
            _ => None,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AppError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        tracing::error!("Network error: {:?}", err);
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown url>".to_string());
        if err.is_timeout() {
            AppError::Network(format!("request to {} timed out", url))
        } else {
            AppError::Network(format!("request to {} failed: {}", url, err))
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        tracing::error!("IO error: {:?}", err);
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::RecordParse(err.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        tracing::error!("Archive error: {:?}", err);
        AppError::Io(format!("archive extraction failed: {}", err))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("background task failed: {}", err))
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
    pub build_number: Option<i64>,
}

impl ErrorResponse {
    pub fn new(error: &AppError, build_number: Option<i64>) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
                details: error.details(),
            },
            build_number,
        }
    }
}

/// Wrapper type for errors that carry the local build number.
pub struct AppErrorWithBuild {
    pub error: AppError,
    pub build_number: Option<i64>,
}

impl IntoResponse for AppErrorWithBuild {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let body = ErrorResponse::new(&self.error, self.build_number);
        (status, Json(body)).into_response()
    }
}
