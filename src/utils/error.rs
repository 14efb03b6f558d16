use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session has been canceled")]
    SessionCanceled,

    #[error("Session has already started")]
    SessionEnded,

    #[error("Session is fully booked")]
    CapacityExceeded,

    #[error("Ticket has no remaining uses")]
    TicketExhausted,

    #[error("Ticket is not eligible for this session")]
    TicketNotEligible,

    #[error("Ticket has expired")]
    TicketExpired,

    #[error("Ticket product not found")]
    ProductNotFound,

    #[error("Ticket product is not on sale")]
    ProductNotOnSale,

    #[error("Invalid discount: {0}")]
    InvalidDiscount(String),

    #[error("Order not found")]
    OrderNotFound,

    #[error("Order has not been confirmed")]
    OrderNotConfirmed,

    #[error("Order is not awaiting confirmation")]
    OrderNotPending,

    #[error("Already booked for this session")]
    AlreadyBooked,

    #[error("Store contention, retry")]
    Conflict,

    #[error("Database error")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidDiscount(_) => StatusCode::BAD_REQUEST,
            AppError::SessionNotFound | AppError::ProductNotFound | AppError::OrderNotFound => {
                StatusCode::NOT_FOUND
            }
            AppError::SessionCanceled
            | AppError::SessionEnded
            | AppError::ProductNotOnSale
            | AppError::TicketNotEligible
            | AppError::TicketExpired
            | AppError::OrderNotConfirmed
            | AppError::OrderNotPending => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::CapacityExceeded | AppError::TicketExhausted | AppError::AlreadyBooked => {
                StatusCode::CONFLICT
            }
            AppError::Conflict => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine tag per condition; the UI maps these to
    /// human-readable messages.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::SessionNotFound => "SESSION_NOT_FOUND",
            AppError::SessionCanceled => "SESSION_CANCELED",
            AppError::SessionEnded => "SESSION_ENDED",
            AppError::CapacityExceeded => "CAPACITY_EXCEEDED",
            AppError::TicketExhausted => "TICKET_EXHAUSTED",
            AppError::TicketNotEligible => "TICKET_NOT_ELIGIBLE",
            AppError::TicketExpired => "TICKET_EXPIRED",
            AppError::ProductNotFound => "PRODUCT_NOT_FOUND",
            AppError::ProductNotOnSale => "PRODUCT_NOT_ON_SALE",
            AppError::InvalidDiscount(_) => "INVALID_DISCOUNT",
            AppError::OrderNotFound => "ORDER_NOT_FOUND",
            AppError::OrderNotConfirmed => "ORDER_NOT_CONFIRMED",
            AppError::OrderNotPending => "ORDER_NOT_PENDING",
            AppError::AlreadyBooked => "ALREADY_BOOKED",
            AppError::Conflict => "CONFLICT",
            AppError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Transient contention the orchestrator may retry once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Conflict)
    }

    fn log(&self) {
        match self {
            AppError::Database(e) => {
                error!(error = ?e, "Database error");
            }
            other => {
                error!(code = other.code(), error = %other, "Request rejected");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let public_message = match &self {
            AppError::Database(_) => "A database error occurred".to_string(),
            other => other.to_string(),
        };

        error_response(code, public_message, None, status)
    }
}
