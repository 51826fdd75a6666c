//! REST API module.
//!
//! Every response uses the `{success, data | error, buildNumber}` envelope,
//! where `buildNumber` is the build of the local snapshot.

mod changelogs;
mod items;
mod operations;
mod search;

pub use changelogs::*;
pub use items::*;
pub use operations::*;
pub use search::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::{AppError, AppErrorWithBuild};

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip)]
    pub status: StatusCode,
    pub success: bool,
    pub data: T,
    pub build_number: Option<i64>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, build_number: Option<i64>) -> Self {
        Self {
            status: StatusCode::OK,
            success: true,
            data,
            build_number,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppErrorWithBuild>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T, build_number: Option<i64>) -> ApiResult<T> {
    Ok(ApiResponse::new(data, build_number))
}

/// Create a `202 Accepted` response for a started background operation.
pub fn accepted<T: Serialize>(data: T, build_number: Option<i64>) -> ApiResult<T> {
    let mut response = ApiResponse::new(data, build_number);
    response.status = StatusCode::ACCEPTED;
    Ok(response)
}

/// Create an error API response.
pub fn error<T: Serialize>(err: AppError, build_number: Option<i64>) -> ApiResult<T> {
    Err(AppErrorWithBuild {
        error: err,
        build_number,
    })
}
