use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::AppState;
use crate::models::DiscountSpec;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Deserialize)]
pub struct QuoteRequest {
    pub product_id: Uuid,
    pub count_option_index: Option<usize>,
    pub discount: Option<DiscountSpec>,
}

pub async fn quote(
    State(state): State<AppState>,
    Json(req): Json<QuoteRequest>,
) -> Result<Response, AppError> {
    let quote = state
        .orchestrator
        .price_quote(req.product_id, req.count_option_index, req.discount)
        .await?;
    Ok(success(quote, "Quote computed").into_response())
}
