use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::core::Identity;
use crate::handlers::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

/// What the caller can use to book this session: their own usable
/// tickets plus the products they could buy for it.
pub async fn eligibility(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    identity: Identity,
) -> Result<Response, AppError> {
    let result = state
        .orchestrator
        .resolve_eligibility(session_id, identity)
        .await?;
    Ok(success(result, "Eligibility resolved").into_response())
}
