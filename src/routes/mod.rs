use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, security_headers};
use crate::handlers::{self, health_check, AppState};

pub fn create_routes(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/api/sessions/:session_id/eligibility",
            get(handlers::sessions::eligibility),
        )
        .route("/api/quotes", post(handlers::quotes::quote))
        .route(
            "/api/bookings/ticket",
            post(handlers::bookings::book_with_ticket),
        )
        .route(
            "/api/bookings/purchase",
            post(handlers::bookings::purchase_and_book),
        )
        .route(
            "/api/bookings/onsite",
            post(handlers::bookings::book_on_site),
        )
        .route("/api/orders/:order_id/confirm", post(handlers::orders::confirm))
        .route("/api/orders/:order_id/revert", post(handlers::orders::revert))
        .with_state(state);

    let router = Router::new()
        .route("/health", get(health_check))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(create_cors_layer());

    security_headers(router)
}
