pub mod auth;
pub mod crypto;
pub mod files;
pub mod status;

use axum::response::Json;

use interlock_core::response::ApiResponse;
use interlock_core::Error;

use crate::state::AppState;

/// Render an error as its JSON envelope, recording it in the status
/// registry on the way out.
pub fn error_response(
    state: &AppState,
    err: Error,
    status_code: Option<&'static str>,
) -> Json<ApiResponse> {
    state.status.error(&err);

    Json(ApiResponse::error(&err, status_code))
}

/// Collapse a handler result into the JSON envelope.
pub fn into_json(
    state: &AppState,
    result: interlock_core::Result<ApiResponse>,
) -> Json<ApiResponse> {
    match result {
        Ok(res) => Json(res),
        Err(err) => error_response(state, err, None),
    }
}
