use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
}

/// A bank-transfer order awaiting out-of-band deposit verification.
///
/// Created in PENDING with the price breakdown frozen at order time;
/// no ticket, booking or ledger row exists until staff confirms.
/// Confirmation links the rows it created so reversal can undo them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BankTransferOrder {
    pub id: Uuid,
    pub academy_id: Uuid,
    pub member_id: Option<Uuid>,
    pub product_id: Uuid,
    pub session_id: Option<Uuid>,
    pub count_option_index: Option<i32>,
    pub discount_id: Option<Uuid>,
    pub original_price: Decimal,
    pub discount_amount: Decimal,
    pub final_price: Decimal,
    pub guest_name: Option<String>,
    pub guest_phone: Option<String>,
    pub status: OrderStatus,
    pub owned_ticket_id: Option<Uuid>,
    pub revenue_transaction_id: Option<Uuid>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
