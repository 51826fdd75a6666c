//! Item name lookup.

use axum::extract::{Path, State};
use serde::Serialize;

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemName {
    pub id: String,
    pub name: String,
}

/// GET /api/items/:id/name - Display name of an indexed record.
pub async fn get_item_name(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ItemName> {
    let build_number = state.ops.local_build_number().await;

    match state.ops.lookup_name(&id).await {
        Ok(Some(name)) => success(ItemName { id, name }, build_number),
        Ok(None) => error(
            AppError::NotFound(format!("Item {} not found", id)),
            build_number,
        ),
        Err(e) => error(e, build_number),
    }
}
