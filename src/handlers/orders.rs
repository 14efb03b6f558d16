use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{empty_success, success};

#[derive(Deserialize, Default)]
pub struct ConfirmRequest {
    pub staff_id: Option<Uuid>,
}

/// Staff verified the deposit: issue the ticket, record the sale and
/// confirm the booking the order was created for.
pub async fn confirm(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    body: Option<Json<ConfirmRequest>>,
) -> Result<Response, AppError> {
    let staff_id = body.and_then(|Json(b)| b.staff_id);
    let confirmed = state
        .orchestrator
        .confirm_deferred_payment(order_id, staff_id)
        .await?;
    Ok(success(confirmed, "Bank transfer confirmed").into_response())
}

/// Undo a confirmation made in error. Safe to repeat.
pub async fn revert(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Response, AppError> {
    state.orchestrator.revert_deferred_payment(order_id).await?;
    Ok(empty_success("Confirmation reverted").into_response())
}
