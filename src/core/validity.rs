//! Validity computation shared by every settlement branch.
//!
//! Each path that issues a ticket (immediate, hosted-checkout
//! callback, deferred confirmation) must produce identical terms for
//! the same product and purchase date, so the ledger snapshot and the
//! issued ticket can never disagree.

use chrono::{Days, NaiveDate};

use crate::models::{CountOption, TicketKind, TicketProduct};

/// Period products without an explicit window default to one year.
pub const DEFAULT_PERIOD_DAYS: u64 = 365;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityTerms {
    /// `None` for period tickets.
    pub remaining_count: Option<i32>,
    pub start_date: NaiveDate,
    /// `None` means the ticket never expires.
    pub expiry_date: Option<NaiveDate>,
}

pub fn compute(
    product: &TicketProduct,
    option: Option<&CountOption>,
    purchase_date: NaiveDate,
) -> ValidityTerms {
    let valid_days = option
        .and_then(|o| o.valid_days)
        .or(product.valid_days);

    match product.kind {
        TicketKind::Period => ValidityTerms {
            remaining_count: None,
            start_date: purchase_date,
            expiry_date: Some(add_days(
                purchase_date,
                valid_days.map_or(DEFAULT_PERIOD_DAYS, |d| d.max(0) as u64),
            )),
        },
        TicketKind::Count => ValidityTerms {
            remaining_count: Some(
                option
                    .map(|o| o.count)
                    .or(product.total_count)
                    .unwrap_or(1),
            ),
            start_date: purchase_date,
            expiry_date: valid_days
                .filter(|d| *d > 0)
                .map(|d| add_days(purchase_date, d as u64)),
        },
    }
}

fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TicketCategory;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use sqlx::types::Json;
    use uuid::Uuid;

    fn product(kind: TicketKind, total_count: Option<i32>, valid_days: Option<i32>) -> TicketProduct {
        TicketProduct {
            id: Uuid::new_v4(),
            academy_id: Uuid::new_v4(),
            class_id: None,
            name: "test".into(),
            kind,
            category: TicketCategory::Popup,
            price: Decimal::from(10_000),
            total_count,
            valid_days,
            is_general: false,
            is_coupon: true,
            is_on_sale: true,
            is_public: true,
            count_options: Json(vec![]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn period_defaults_to_365_days() {
        let terms = compute(&product(TicketKind::Period, None, None), None, day(2026, 1, 1));
        assert_eq!(terms.remaining_count, None);
        assert_eq!(terms.expiry_date, Some(day(2027, 1, 1)));
    }

    #[test]
    fn period_with_explicit_window() {
        let terms = compute(&product(TicketKind::Period, None, Some(30)), None, day(2026, 1, 1));
        assert_eq!(terms.expiry_date, Some(day(2026, 1, 31)));
    }

    #[test]
    fn count_without_valid_days_never_expires() {
        let terms = compute(&product(TicketKind::Count, Some(10), None), None, day(2026, 1, 1));
        assert_eq!(terms.remaining_count, Some(10));
        assert_eq!(terms.expiry_date, None);
    }

    #[test]
    fn count_option_overrides_count_price_and_validity() {
        let opt = CountOption {
            count: 5,
            price: Decimal::from(45_000),
            valid_days: Some(60),
        };
        let terms = compute(
            &product(TicketKind::Count, Some(10), Some(90)),
            Some(&opt),
            day(2026, 3, 1),
        );
        assert_eq!(terms.remaining_count, Some(5));
        assert_eq!(terms.expiry_date, Some(day(2026, 4, 30)));
    }

    #[test]
    fn every_branch_uses_the_same_computation() {
        // The orchestrator calls this function from each settlement
        // branch; equal inputs must yield equal terms.
        let p = product(TicketKind::Count, Some(10), Some(30));
        let a = compute(&p, None, day(2026, 5, 5));
        let b = compute(&p, None, day(2026, 5, 5));
        assert_eq!(a, b);
    }
}
