use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One scheduled occurrence of a class, with a seat cap.
///
/// `confirmed_seat_count` is denormalized and must always equal the
/// count of CONFIRMED/COMPLETED bookings for the session; only the
/// store recomputes it, never handler code.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub class_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub max_seats: i32,
    pub confirmed_seat_count: i32,
    pub is_canceled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn is_full(&self) -> bool {
        self.confirmed_seat_count >= self.max_seats
    }
}

/// The slice of the class record that eligibility rules need.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClassInfo {
    pub id: Uuid,
    pub academy_id: Uuid,
    pub title: String,
    pub allow_general: bool,
    pub allow_coupon: bool,
    pub allow_popup: bool,
}

impl ClassInfo {
    /// Coupon tickets ride on either flag; see DESIGN.md for why the
    /// two are currently interchangeable.
    pub fn accepts_coupons(&self) -> bool {
        self.allow_coupon || self.allow_popup
    }
}

/// A session joined with its class, as fetched by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session: Session,
    pub class: ClassInfo,
}
