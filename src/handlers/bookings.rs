use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::core::{Identity, PurchaseRequest, PurchaseOutcome, Settlement};
use crate::handlers::AppState;
use crate::models::{DiscountSpec, GuestContact};
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Deserialize)]
pub struct TicketBookingRequest {
    pub session_id: Uuid,
    pub owned_ticket_id: Uuid,
}

/// Spend one unit of an owned ticket on a seat.
pub async fn book_with_ticket(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<TicketBookingRequest>,
) -> Result<Response, AppError> {
    let member_id = identity
        .member_id()
        .ok_or_else(|| AppError::Validation("a member identity is required".into()))?;
    let booking = state
        .orchestrator
        .book_with_ticket(req.session_id, req.owned_ticket_id, member_id)
        .await?;
    Ok(created(booking, "Booking confirmed").into_response())
}

#[derive(Deserialize)]
pub struct PurchaseBookingRequest {
    pub session_id: Uuid,
    pub product_id: Uuid,
    pub count_option_index: Option<usize>,
    pub settlement: Settlement,
    pub discount: Option<DiscountSpec>,
    pub guest: Option<GuestContact>,
}

/// Buy a ticket product and book the session in one step. The
/// response shape depends on the settlement path.
pub async fn purchase_and_book(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<PurchaseBookingRequest>,
) -> Result<Response, AppError> {
    let outcome = state
        .orchestrator
        .purchase_and_book(
            PurchaseRequest {
                session_id: req.session_id,
                product_id: req.product_id,
                count_option_index: req.count_option_index,
                settlement: req.settlement,
                discount: req.discount,
                guest: req.guest,
            },
            identity,
        )
        .await?;

    let response = match &outcome {
        PurchaseOutcome::Booked { .. } => created(outcome, "Purchase complete").into_response(),
        PurchaseOutcome::CheckoutPrepared { .. } => {
            success(outcome, "Checkout prepared").into_response()
        }
        PurchaseOutcome::Deferred { .. } => {
            created(outcome, "Awaiting bank transfer").into_response()
        }
    };
    Ok(response)
}

#[derive(Deserialize)]
pub struct OnSiteBookingRequest {
    pub session_id: Uuid,
    pub guest: GuestContact,
}

/// Reserve a spot with payment due at the door. Holds no seat until
/// staff confirms.
pub async fn book_on_site(
    State(state): State<AppState>,
    Json(req): Json<OnSiteBookingRequest>,
) -> Result<Response, AppError> {
    let booking = state
        .orchestrator
        .book_on_site(req.session_id, req.guest)
        .await?;
    Ok(created(booking, "On-site booking registered").into_response())
}
