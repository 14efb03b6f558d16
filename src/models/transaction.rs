use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::ticket::TicketKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    OnSite,
}

/// Append-only ledger row for a completed sale.
///
/// The `*_snapshot` columns copy the product definition at sale time
/// so receipts survive later edits or deletion of the product. The
/// only permitted mutation is deletion during deferred-payment
/// reversal.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RevenueTransaction {
    pub id: Uuid,
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
    pub created_at: DateTime<Utc>,
}
