use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_kind", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TicketKind {
    /// Unlimited use inside a date window.
    Period,
    /// N uses, optionally split into purchasable count options.
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_category", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TicketCategory {
    Regular,
    Popup,
    Workshop,
}

/// A purchasable split of a count-based product. Each option is its
/// own SKU with independent price and validity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountOption {
    pub count: i32,
    pub price: Decimal,
    pub valid_days: Option<i32>,
}

/// A sellable offering owned by an academy. Mutable and deletable
/// independently of past sales; the revenue ledger snapshots what it
/// needs at sale time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketProduct {
    pub id: Uuid,
    pub academy_id: Uuid,
    /// Explicit link to a single class, when the product is
    /// class-specific.
    pub class_id: Option<Uuid>,
    pub name: String,
    pub kind: TicketKind,
    pub category: TicketCategory,
    pub price: Decimal,
    pub total_count: Option<i32>,
    pub valid_days: Option<i32>,
    pub is_general: bool,
    pub is_coupon: bool,
    pub is_on_sale: bool,
    pub is_public: bool,
    pub count_options: Json<Vec<CountOption>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TicketProduct {
    /// Count options only apply to popup/workshop count products.
    pub fn active_count_options(&self) -> &[CountOption] {
        if self.kind == TicketKind::Count
            && matches!(
                self.category,
                TicketCategory::Popup | TicketCategory::Workshop
            )
        {
            &self.count_options
        } else {
            &[]
        }
    }

    pub fn option(&self, index: usize) -> Option<&CountOption> {
        self.active_count_options().get(index)
    }

    /// Display name used for ledger snapshots: option-qualified for
    /// expanded SKUs.
    pub fn display_name(&self, option: Option<&CountOption>) -> String {
        match option {
            Some(o) => format!("{} x{}", self.name, o.count),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TicketStatus {
    Active,
    Expired,
    Used,
    Cancelled,
}

/// A member's purchased instance of a [`TicketProduct`].
///
/// `remaining_count` is `None` for period tickets. Only the store
/// mutates it, through the conditional decrement.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OwnedTicket {
    pub id: Uuid,
    /// `None` when the ticket was issued against a guest order and
    /// has not been claimed yet.
    pub member_id: Option<Uuid>,
    pub product_id: Uuid,
    pub remaining_count: Option<i32>,
    pub start_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OwnedTicket {
    /// A ticket past its expiry date is unusable regardless of the
    /// stored status; an exhausted count ticket likewise.
    pub fn is_usable(&self, today: NaiveDate) -> bool {
        if self.status != TicketStatus::Active {
            return false;
        }
        if let Some(expiry) = self.expiry_date {
            if expiry < today {
                return false;
            }
        }
        match self.remaining_count {
            Some(n) => n > 0,
            None => true,
        }
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.map_or(false, |e| e < today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ticket(
        remaining: Option<i32>,
        expiry: Option<NaiveDate>,
        status: TicketStatus,
    ) -> OwnedTicket {
        OwnedTicket {
            id: Uuid::new_v4(),
            member_id: Some(Uuid::new_v4()),
            product_id: Uuid::new_v4(),
            remaining_count: remaining,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            expiry_date: expiry,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn exhausted_count_ticket_is_unusable() {
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        assert!(!ticket(Some(0), None, TicketStatus::Active).is_usable(today));
        assert!(ticket(Some(1), None, TicketStatus::Active).is_usable(today));
    }

    #[test]
    fn expired_ticket_is_unusable_regardless_of_status() {
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let expired = NaiveDate::from_ymd_opt(2026, 5, 31).unwrap();
        assert!(!ticket(Some(3), Some(expired), TicketStatus::Active).is_usable(today));
        // Expiring today is still usable.
        assert!(ticket(Some(3), Some(today), TicketStatus::Active).is_usable(today));
    }

    #[test]
    fn period_ticket_without_expiry_never_expires() {
        let today = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        assert!(ticket(None, None, TicketStatus::Active).is_usable(today));
    }
}
