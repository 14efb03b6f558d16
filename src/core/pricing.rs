//! Quote computation for ticket purchases.
//!
//! Pure: safe to recompute on every keystroke of an interactive staff
//! flow. Invariant: `0 <= discount <= original`, so
//! `0 <= final <= original` for every input.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Discount, DiscountKind};
use crate::utils::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub original: Decimal,
    pub discount: Decimal,
    #[serde(rename = "final")]
    pub final_price: Decimal,
}

impl Quote {
    pub fn full_price(original: Decimal) -> Self {
        Quote {
            original,
            discount: Decimal::ZERO,
            final_price: original,
        }
    }
}

/// A discount reduced to its arithmetic, after any policy lookup and
/// validation has happened.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedDiscount {
    pub kind: DiscountKind,
    pub value: Decimal,
}

/// Percent discounts floor to a whole currency unit; fixed amounts
/// apply as-is. The result clamps into `[0, original]`.
pub fn quote(original: Decimal, discount: Option<ResolvedDiscount>) -> Quote {
    let raw = match discount {
        None => Decimal::ZERO,
        Some(d) => match d.kind {
            DiscountKind::Percent => (original * d.value / Decimal::ONE_HUNDRED).floor(),
            DiscountKind::Fixed => d.value,
        },
    };

    let clamped = raw.clamp(Decimal::ZERO, original.max(Decimal::ZERO));

    Quote {
        original,
        discount: clamped,
        final_price: original - clamped,
    }
}

/// A policy must be active, inside its validity window, and belong to
/// the product's academy before it may discount anything.
pub fn validate_policy(
    policy: &Discount,
    academy_id: Uuid,
    today: NaiveDate,
) -> Result<ResolvedDiscount, AppError> {
    if !policy.is_active {
        return Err(AppError::InvalidDiscount("policy is not active".into()));
    }
    if let Some(from) = policy.valid_from {
        if from > today {
            return Err(AppError::InvalidDiscount("policy is not yet valid".into()));
        }
    }
    if let Some(until) = policy.valid_until {
        if until < today {
            return Err(AppError::InvalidDiscount("policy has expired".into()));
        }
    }
    if policy.academy_id != academy_id {
        return Err(AppError::InvalidDiscount(
            "policy belongs to a different academy".into(),
        ));
    }
    Ok(ResolvedDiscount {
        kind: policy.kind,
        value: policy.value,
    })
}
