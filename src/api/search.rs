//! Search API endpoints.

use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use super::{error, success, ApiResult};
use crate::models::{SearchHit, SearchPath};
use crate::ops::OperationEvent;
use crate::AppState;

/// Search query parameters.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    /// Keyword, split on whitespace into tokens that must all match.
    #[serde(default)]
    pub q: String,
    /// Maximum number of results, capped at the configured limit.
    pub limit: Option<usize>,
}

/// Hits of one finished search.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub returned: usize,
    pub total: usize,
    pub cancelled: bool,
    pub path: SearchPath,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub cancel_requested: bool,
}

/// GET /api/search - Run a search to completion.
///
/// A newer search request cancels this one; the partial page is returned
/// with `cancelled` set.
pub async fn search_items(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<SearchResponse> {
    let build_number = state.ops.local_build_number().await;
    let mut handle = state.ops.start_search(params.q, params.limit).await;

    let mut results = Vec::new();
    while let Some(event) = handle.events.recv().await {
        if let OperationEvent::Result { hit } = event {
            results.push(hit);
        }
    }

    match handle.wait().await {
        Ok(outcome) => success(
            SearchResponse {
                results,
                returned: outcome.returned,
                total: outcome.total,
                cancelled: outcome.cancelled,
                path: outcome.path,
            },
            build_number,
        ),
        Err(e) => error(e, build_number),
    }
}

/// DELETE /api/search - Cancel the search in flight.
pub async fn cancel_search(State(state): State<AppState>) -> ApiResult<CancelResponse> {
    let build_number = state.ops.local_build_number().await;
    state.ops.cancel_search().await;
    success(
        CancelResponse {
            cancel_requested: true,
        },
        build_number,
    )
}
