//! Ticket eligibility resolution.
//!
//! Given a session's class, decides which owned tickets a member can
//! spend on it and which products are on offer for it. Both sides
//! apply the same three rules: explicitly class-linked, general
//! access within the same academy, or coupon when the class accepts
//! coupons. Cross-academy tickets never qualify.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{ClassInfo, OwnedTicket, TicketCategory, TicketKind, TicketProduct};

/// An owned ticket the member may spend on the session, with the
/// product fields the UI renders next to it.
#[derive(Debug, Clone, Serialize)]
pub struct EligibleTicket {
    pub ticket: OwnedTicket,
    pub product_id: Uuid,
    pub product_name: String,
    pub kind: TicketKind,
    pub is_general: bool,
    pub is_coupon: bool,
}

/// One purchasable line. Count-option products expand into one line
/// per option, each a distinct SKU.
#[derive(Debug, Clone, Serialize)]
pub struct PurchasableItem {
    /// `{product_id}` or `{product_id}_{count}` for expanded options.
    pub sku: String,
    pub product_id: Uuid,
    pub count_option_index: Option<usize>,
    pub name: String,
    pub kind: TicketKind,
    pub category: TicketCategory,
    pub count: Option<i32>,
    pub valid_days: Option<i32>,
    pub price: Decimal,
    pub is_general: bool,
    pub is_coupon: bool,
    pub class_linked: bool,
}

fn product_rule(product: &TicketProduct, class: &ClassInfo) -> bool {
    if product.academy_id != class.academy_id {
        return false;
    }
    if product.class_id == Some(class.id) {
        return true;
    }
    if product.is_coupon {
        return class.accepts_coupons();
    }
    // General access is academy-scoped; the academy match above is
    // the whole gate.
    product.is_general
}

/// Output A: the member's usable tickets that the rules admit for
/// this class. An empty result leaves the purchase path open.
pub fn eligible_owned_tickets(
    class: &ClassInfo,
    owned: &[(OwnedTicket, TicketProduct)],
    today: NaiveDate,
) -> Vec<EligibleTicket> {
    owned
        .iter()
        .filter(|(ticket, _)| ticket.is_usable(today))
        .filter(|(_, product)| product_rule(product, class))
        .map(|(ticket, product)| EligibleTicket {
            ticket: ticket.clone(),
            product_id: product.id,
            product_name: product.name.clone(),
            kind: product.kind,
            is_general: product.is_general,
            is_coupon: product.is_coupon,
        })
        .collect()
}

/// Is this specific ticket usable for this class? Same rule set as
/// the list, applied at commit time so a stale client cannot spend an
/// ineligible ticket.
pub fn is_ticket_eligible(product: &TicketProduct, class: &ClassInfo) -> bool {
    product_rule(product, class)
}

/// Output B: on-sale, public products offered for this class, sorted
/// class-linked first, then general, coupons last. Popup/workshop
/// count products with per-option pricing expand into one line per
/// option.
pub fn purchasable_products(
    class: &ClassInfo,
    products: &[TicketProduct],
) -> Vec<PurchasableItem> {
    let mut items: Vec<PurchasableItem> = Vec::new();

    for product in products {
        if !product.is_on_sale || !product.is_public {
            continue;
        }
        if !product_rule(product, class) {
            continue;
        }

        let class_linked = product.class_id == Some(class.id);
        let options = product.active_count_options();
        if options.is_empty() {
            items.push(PurchasableItem {
                sku: product.id.to_string(),
                product_id: product.id,
                count_option_index: None,
                name: product.name.clone(),
                kind: product.kind,
                category: product.category,
                count: product.total_count,
                valid_days: product.valid_days,
                price: product.price,
                is_general: product.is_general,
                is_coupon: product.is_coupon,
                class_linked,
            });
        } else {
            for (index, option) in options.iter().enumerate() {
                if option.count <= 0 {
                    continue;
                }
                items.push(PurchasableItem {
                    sku: format!("{}_{}", product.id, option.count),
                    product_id: product.id,
                    count_option_index: Some(index),
                    name: product.display_name(Some(option)),
                    kind: product.kind,
                    category: product.category,
                    count: Some(option.count),
                    valid_days: option.valid_days.or(product.valid_days),
                    price: option.price,
                    is_general: product.is_general,
                    is_coupon: product.is_coupon,
                    class_linked,
                });
            }
        }
    }

    items.sort_by_key(|item| sort_rank(item));
    items
}

fn sort_rank(item: &PurchasableItem) -> u8 {
    if item.class_linked {
        0
    } else if item.is_coupon {
        2
    } else {
        1
    }
}
