//! Sync, index rebuild and status endpoints.

use axum::extract::State;
use serde::Serialize;
use uuid::Uuid;

use super::{accepted, error, success, ApiResult};
use crate::models::Build;
use crate::ops::{IndexStatus, OperationKind, OperationStatus};
use crate::AppState;

/// Body of a `202 Accepted` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedOperation {
    pub run_id: Uuid,
    pub kind: OperationKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub local_build: Option<Build>,
    pub index: Option<IndexStatus>,
    pub sync: OperationStatus,
    pub rebuild_index: OperationStatus,
}

/// POST /api/sync - Start a sync in the background.
pub async fn start_sync(State(state): State<AppState>) -> ApiResult<StartedOperation> {
    let build_number = state.ops.local_build_number().await;

    match state.ops.start_sync() {
        Ok(handle) => {
            let run_id = state.registry.track(handle).await;
            accepted(
                StartedOperation {
                    run_id,
                    kind: OperationKind::Sync,
                },
                build_number,
            )
        }
        Err(e) => error(e, build_number),
    }
}

/// POST /api/index/rebuild - Start an index rebuild in the background.
pub async fn start_rebuild(State(state): State<AppState>) -> ApiResult<StartedOperation> {
    let build_number = state.ops.local_build_number().await;

    match state.ops.start_rebuild() {
        Ok(handle) => {
            let run_id = state.registry.track(handle).await;
            accepted(
                StartedOperation {
                    run_id,
                    kind: OperationKind::RebuildIndex,
                },
                build_number,
            )
        }
        Err(e) => error(e, build_number),
    }
}

/// GET /api/status - Local build, index statistics and operation states.
pub async fn get_status(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let local_build = match state.ops.local_build().await {
        Ok(build) => build,
        Err(e) => return error(e, None),
    };
    let build_number = local_build.as_ref().map(|b| b.build_number);

    let index = match state.ops.index_status().await {
        Ok(index) => index,
        Err(e) => return error(e, build_number),
    };

    success(
        StatusResponse {
            local_build,
            index,
            sync: state.registry.get(OperationKind::Sync).await,
            rebuild_index: state.registry.get(OperationKind::RebuildIndex).await,
        },
        build_number,
    )
}
