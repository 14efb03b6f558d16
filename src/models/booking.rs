use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "booking_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Statuses that hold a seat against the session cap.
    pub fn occupies_seat(self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
}

/// A member's (or guest's) claim on a seat in a session.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub session_id: Uuid,
    pub member_id: Option<Uuid>,
    /// Set when the booking is ticket-funded; detached on reversal.
    pub owned_ticket_id: Option<Uuid>,
    /// Back-link to the bank transfer order that produced this
    /// booking, when there is one.
    pub order_id: Option<Uuid>,
    pub guest_name: Option<String>,
    pub guest_phone: Option<String>,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contact details for on-site (Path C) and guest deferred bookings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestContact {
    pub name: String,
    pub phone: String,
}

impl GuestContact {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("guest name is required".into());
        }
        if self.phone.trim().is_empty() {
            return Err("guest phone is required".into());
        }
        Ok(())
    }
}
