//! Storage seam for the booking core.
//!
//! The orchestrator never talks SQL; it sequences the atomic
//! contracts below. Two implementations: [`PgStore`] (Postgres,
//! row-level locking) and [`MemoryStore`] (single mutex, tests and
//! local demo).

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{
    BankTransferOrder, Booking, BookingStatus, Discount, GuestContact, OwnedTicket, PaymentMethod,
    PaymentStatus, RevenueTransaction, SessionContext, TicketKind, TicketProduct,
};
use crate::utils::error::AppError;

/// Who is taking the seat, for duplicate-booking detection.
#[derive(Debug, Clone)]
pub enum BookerKey {
    Member(Uuid),
    /// Guests are deduplicated by phone within a session.
    GuestPhone(String),
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub session_id: Uuid,
    pub member_id: Option<Uuid>,
    pub owned_ticket_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub guest: Option<GuestContact>,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone)]
pub struct NewOwnedTicket {
    pub member_id: Option<Uuid>,
    pub product_id: Uuid,
    pub remaining_count: Option<i32>,
    pub start_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct NewRevenue {
    pub academy_id: Uuid,
    pub member_id: Option<Uuid>,
    pub product_id: Uuid,
    pub owned_ticket_id: Uuid,
    pub discount_id: Option<Uuid>,
    pub original_price: Decimal,
    pub discount_amount: Decimal,
    pub final_price: Decimal,
    pub payment_method: PaymentMethod,
    pub product_name_snapshot: String,
    pub product_kind_snapshot: TicketKind,
    pub valid_days_snapshot: Option<i32>,
    pub quantity: i32,
    pub transaction_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub academy_id: Uuid,
    pub member_id: Option<Uuid>,
    pub product_id: Uuid,
    pub session_id: Option<Uuid>,
    pub count_option_index: Option<i32>,
    pub discount_id: Option<Uuid>,
    pub original_price: Decimal,
    pub discount_amount: Decimal,
    pub final_price: Decimal,
    pub guest: Option<GuestContact>,
}

/// Rows created by a deferred confirmation, linked onto the order.
#[derive(Debug, Clone, Default)]
pub struct OrderLinks {
    pub owned_ticket_id: Option<Uuid>,
    pub revenue_transaction_id: Option<Uuid>,
    pub confirmed_by: Option<Uuid>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // -- reads ----------------------------------------------------------

    async fn session_context(&self, session_id: Uuid) -> Result<SessionContext, AppError>;

    async fn product(&self, product_id: Uuid) -> Result<TicketProduct, AppError>;

    /// The member's ACTIVE tickets joined with their products.
    async fn owned_tickets_for_member(
        &self,
        member_id: Uuid,
    ) -> Result<Vec<(OwnedTicket, TicketProduct)>, AppError>;

    /// Fails with `TICKET_NOT_ELIGIBLE` when the ticket does not
    /// exist; callers cannot distinguish a deleted ticket from one
    /// they never owned.
    async fn owned_ticket(&self, ticket_id: Uuid) -> Result<OwnedTicket, AppError>;

    async fn products_on_sale(&self, academy_id: Uuid) -> Result<Vec<TicketProduct>, AppError>;

    async fn discount(&self, discount_id: Uuid) -> Result<Discount, AppError>;

    async fn order(&self, order_id: Uuid) -> Result<BankTransferOrder, AppError>;

    /// Any non-cancelled booking by this booker in this session?
    async fn has_booking_for(
        &self,
        session_id: Uuid,
        booker: &BookerKey,
    ) -> Result<bool, AppError>;

    async fn booking_for_order(&self, order_id: Uuid) -> Result<Option<Booking>, AppError>;

    // -- atomic contracts ----------------------------------------------

    /// Conditional decrement: one unit off a count ticket, only while
    /// `remaining_count > 0`; never read-then-write. Exhausting the
    /// last unit flips the ticket to USED. Period tickets are a
    /// no-op.
    async fn consume_ticket_unit(&self, ticket_id: Uuid) -> Result<(), AppError>;

    /// Compensation for [`consume_ticket_unit`]: puts one unit back
    /// and reactivates a USED ticket.
    async fn restore_ticket_unit(&self, ticket_id: Uuid) -> Result<(), AppError>;

    /// Capacity check and insert as one atomic unit on the session
    /// row, followed by an authoritative seat recount, all inside the
    /// same transaction. Fails with `CAPACITY_EXCEEDED` without
    /// touching anything, and with `ALREADY_BOOKED` when the booker
    /// already holds a live booking in the session (unique index in
    /// Postgres, equivalent guard in memory).
    async fn insert_booking_guarded(&self, new: NewBooking) -> Result<Booking, AppError>;

    /// Recompute `confirmed_seat_count` from the authoritative count
    /// of seat-holding bookings. Never increment/decrement.
    async fn recount_session_seats(&self, session_id: Uuid) -> Result<i32, AppError>;

    async fn insert_owned_ticket(&self, new: NewOwnedTicket) -> Result<OwnedTicket, AppError>;

    /// Idempotent: deleting an absent ticket succeeds.
    async fn delete_owned_ticket(&self, ticket_id: Uuid) -> Result<(), AppError>;

    async fn insert_revenue(&self, new: NewRevenue) -> Result<RevenueTransaction, AppError>;

    /// Idempotent: deleting an absent row succeeds.
    async fn delete_revenue(&self, transaction_id: Uuid) -> Result<(), AppError>;

    async fn insert_order(&self, new: NewOrder) -> Result<BankTransferOrder, AppError>;

    /// Conditional PENDING to CONFIRMED transition. Fails with
    /// `ORDER_NOT_PENDING` when another confirmation got there first,
    /// so racing callers cannot both settle.
    async fn mark_order_confirmed(
        &self,
        order_id: Uuid,
        links: OrderLinks,
    ) -> Result<BankTransferOrder, AppError>;

    /// Back to PENDING with links and confirmed_by cleared.
    /// confirmed_at stays as a record of the last confirmation.
    async fn reset_order(&self, order_id: Uuid) -> Result<BankTransferOrder, AppError>;

    /// Reversal step for the order's own booking: PENDING/PENDING,
    /// ticket reference detached, session seats recounted.
    async fn detach_booking_funding(&self, booking_id: Uuid) -> Result<(), AppError>;

    /// Cancel every non-cancelled booking still funded by this
    /// ticket, detach their references and recount the affected
    /// sessions.
    async fn cancel_bookings_for_ticket(&self, ticket_id: Uuid) -> Result<(), AppError>;
}
