use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::core::Orchestrator;
use crate::utils::response::success;

pub mod bookings;
pub mod identity;
pub mod orders;
pub mod quotes;
pub mod sessions;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "studio-api",
    };

    success(payload, "Health check successful").into_response()
}
