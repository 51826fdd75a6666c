//! Change-log history endpoints.

use axum::extract::{Path, State};

use super::{error, success, ApiResult};
use crate::models::ChangeLogEntry;
use crate::reconcile::{list_changelogs, read_changelog, ChangeLogFile};
use crate::AppState;

/// GET /api/changelogs - List change-log files, newest first.
pub async fn list_changelog_files(State(state): State<AppState>) -> ApiResult<Vec<ChangeLogFile>> {
    let build_number = state.ops.local_build_number().await;

    match list_changelogs(&state.ops.config().changelog_dir).await {
        Ok(files) => success(files, build_number),
        Err(e) => error(e, build_number),
    }
}

/// GET /api/changelogs/:name - Entries of one change-log file.
pub async fn get_changelog(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Vec<ChangeLogEntry>> {
    let build_number = state.ops.local_build_number().await;

    match read_changelog(&state.ops.config().changelog_dir, &name).await {
        Ok(entries) => success(entries, build_number),
        Err(e) => error(e, build_number),
    }
}
