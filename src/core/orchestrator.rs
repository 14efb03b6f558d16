//! Booking/ticket orchestration.
//!
//! One state machine per payment path: spend an owned ticket, buy a
//! ticket then book (immediate, hosted checkout, or bank transfer),
//! or book now and pay on site. Every multi-entity commit either goes
//! through a single atomic store contract or carries a compensating
//! rollback, so a failed attempt leaves no partial artifacts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::capacity;
use crate::core::eligibility::{self, EligibleTicket, PurchasableItem};
use crate::core::pricing::{self, Quote, ResolvedDiscount};
use crate::core::validity;
use crate::models::{
    BankTransferOrder, Booking, BookingStatus, CountOption, DiscountSpec, GuestContact,
    OrderStatus, OwnedTicket, PaymentMethod, PaymentStatus, RevenueTransaction, SessionContext,
    TicketKind, TicketProduct,
};
use crate::notify::{self, NotificationEvent, NotificationKind, Notifier};
use crate::store::{
    BookerKey, NewBooking, NewOrder, NewOwnedTicket, NewRevenue, OrderLinks, Store,
};
use crate::utils::error::AppError;

const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Caller identity resolved by the upstream identity provider and
/// passed into every call; the core never reads ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Member(Uuid),
    Guest,
}

impl Identity {
    pub fn member_id(self) -> Option<Uuid> {
        match self {
            Identity::Member(id) => Some(id),
            Identity::Guest => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Settlement {
    /// Settled in-process (card demo, staff-entered sale).
    Immediate,
    /// Hand off to the external payment widget; its success callback
    /// re-enters as `Immediate`.
    HostedCheckout,
    /// Bank transfer: order now, staff confirms the deposit later.
    BankTransfer,
}

#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub session_id: Uuid,
    pub product_id: Uuid,
    pub count_option_index: Option<usize>,
    pub settlement: Settlement,
    pub discount: Option<DiscountSpec>,
    /// Required when the caller is a guest.
    pub guest: Option<GuestContact>,
}

/// Order descriptor handed to the hosted payment widget.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOrder {
    pub amount: Decimal,
    pub order_id: Uuid,
    pub order_name: String,
    pub success_url: String,
    pub fail_url: String,
    pub customer_key: String,
}

/// URLs the payment widget returns through.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub fail_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    /// Immediate settlement went through: ticket issued, sale
    /// recorded, seat confirmed.
    Booked {
        booking: Booking,
        ticket: OwnedTicket,
        transaction: RevenueTransaction,
    },
    /// Hosted checkout: nothing persisted; the widget takes over.
    CheckoutPrepared { checkout: CheckoutOrder },
    /// Bank transfer: order parked until staff confirms the deposit.
    Deferred { order: BankTransferOrder },
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmedOrder {
    pub order: BankTransferOrder,
    pub ticket: OwnedTicket,
    pub transaction: RevenueTransaction,
    pub booking: Option<Booking>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EligibilityResult {
    pub owned_tickets: Vec<EligibleTicket>,
    pub purchasable_products: Vec<PurchasableItem>,
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    checkout_urls: CheckoutUrls,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        checkout_urls: CheckoutUrls,
    ) -> Self {
        Self {
            store,
            notifier,
            checkout_urls,
        }
    }

    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }

    // -- eligibility ----------------------------------------------------

    pub async fn resolve_eligibility(
        &self,
        session_id: Uuid,
        identity: Identity,
    ) -> Result<EligibilityResult, AppError> {
        let ctx = self.store.session_context(session_id).await?;
        let today = self.today();

        let owned_tickets = match identity {
            Identity::Guest => Vec::new(),
            Identity::Member(member_id) => {
                let owned = self.store.owned_tickets_for_member(member_id).await?;
                eligibility::eligible_owned_tickets(&ctx.class, &owned, today)
            }
        };

        let products = self.store.products_on_sale(ctx.class.academy_id).await?;
        let purchasable_products = eligibility::purchasable_products(&ctx.class, &products);

        Ok(EligibilityResult {
            owned_tickets,
            purchasable_products,
        })
    }

    // -- pricing --------------------------------------------------------

    pub async fn price_quote(
        &self,
        product_id: Uuid,
        count_option_index: Option<usize>,
        discount: Option<DiscountSpec>,
    ) -> Result<Quote, AppError> {
        let product = self.store.product(product_id).await?;
        let option = resolve_option(&product, count_option_index)?;
        let original = option.map_or(product.price, |o| o.price);
        let resolved = self
            .resolve_discount(discount.as_ref(), product.academy_id)
            .await?;
        Ok(pricing::quote(original, resolved))
    }

    async fn resolve_discount(
        &self,
        spec: Option<&DiscountSpec>,
        academy_id: Uuid,
    ) -> Result<Option<ResolvedDiscount>, AppError> {
        match spec {
            None => Ok(None),
            Some(DiscountSpec::Manual { kind, value }) => Ok(Some(ResolvedDiscount {
                kind: *kind,
                value: *value,
            })),
            Some(DiscountSpec::Policy { discount_id }) => {
                let policy = self.store.discount(*discount_id).await?;
                pricing::validate_policy(&policy, academy_id, self.today()).map(Some)
            }
        }
    }

    // -- path A: spend an owned ticket ----------------------------------

    pub async fn book_with_ticket(
        &self,
        session_id: Uuid,
        owned_ticket_id: Uuid,
        member_id: Uuid,
    ) -> Result<Booking, AppError> {
        let ctx = self.store.session_context(session_id).await?;
        capacity::ensure_bookable(&ctx, Utc::now())?;

        let ticket = self.store.owned_ticket(owned_ticket_id).await?;
        if ticket.member_id != Some(member_id) {
            return Err(AppError::TicketNotEligible);
        }
        let product = self
            .store
            .product(ticket.product_id)
            .await
            .map_err(|_| AppError::TicketNotEligible)?;

        let today = self.today();
        if ticket.is_expired(today) {
            return Err(AppError::TicketExpired);
        }
        if ticket.remaining_count == Some(0) {
            return Err(AppError::TicketExhausted);
        }
        if !ticket.is_usable(today) || !eligibility::is_ticket_eligible(&product, &ctx.class) {
            return Err(AppError::TicketNotEligible);
        }

        let booker = BookerKey::Member(member_id);
        if self.store.has_booking_for(session_id, &booker).await? {
            return Err(AppError::AlreadyBooked);
        }

        let consumes_unit = product.kind == TicketKind::Count;
        if consumes_unit {
            retry_once(|| self.store.consume_ticket_unit(owned_ticket_id)).await?;
        }

        let new = NewBooking {
            session_id,
            member_id: Some(member_id),
            owned_ticket_id: Some(owned_ticket_id),
            order_id: None,
            guest: None,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Completed,
        };
        let booking = match retry_once(|| self.store.insert_booking_guarded(new.clone())).await {
            Ok(booking) => booking,
            Err(e) => {
                // Roll the decrement back; a failed attempt leaves no
                // partial artifacts.
                if consumes_unit {
                    if let Err(restore_err) =
                        self.store.restore_ticket_unit(owned_ticket_id).await
                    {
                        warn!(
                            ticket_id = %owned_ticket_id,
                            error = %restore_err,
                            "failed to restore consumed ticket unit"
                        );
                    }
                }
                return Err(e);
            }
        };

        info!(booking_id = %booking.id, session_id = %session_id, "booking confirmed with ticket");
        notify::dispatch(
            self.notifier.clone(),
            NotificationEvent {
                kind: NotificationKind::BookingConfirmed,
                member_id: Some(member_id),
                title: "Booking confirmed".into(),
                body: format!("Your seat in {} is confirmed.", ctx.class.title),
            },
        );
        Ok(booking)
    }

    // -- path B: purchase then book -------------------------------------

    pub async fn purchase_and_book(
        &self,
        req: PurchaseRequest,
        identity: Identity,
    ) -> Result<PurchaseOutcome, AppError> {
        let ctx = self.store.session_context(req.session_id).await?;
        capacity::ensure_bookable(&ctx, Utc::now())?;

        let product = self.store.product(req.product_id).await?;
        if !product.is_on_sale || !product.is_public {
            return Err(AppError::ProductNotOnSale);
        }
        if !eligibility::is_ticket_eligible(&product, &ctx.class) {
            return Err(AppError::TicketNotEligible);
        }
        let option = resolve_option(&product, req.count_option_index)?;

        let member_id = identity.member_id();
        let guest = match identity {
            Identity::Member(_) => None,
            Identity::Guest => {
                let contact = req
                    .guest
                    .clone()
                    .ok_or_else(|| AppError::Validation("guest contact is required".into()))?;
                contact.validate().map_err(AppError::Validation)?;
                Some(contact)
            }
        };

        let booker = match (&guest, member_id) {
            (Some(g), _) => BookerKey::GuestPhone(g.phone.clone()),
            (None, Some(id)) => BookerKey::Member(id),
            (None, None) => unreachable!("identity is member or guest"),
        };
        if self.store.has_booking_for(req.session_id, &booker).await? {
            return Err(AppError::AlreadyBooked);
        }

        let original = option.map_or(product.price, |o| o.price);
        let resolved = self
            .resolve_discount(req.discount.as_ref(), product.academy_id)
            .await?;
        let quote = pricing::quote(original, resolved);
        let discount_id = match req.discount {
            Some(DiscountSpec::Policy { discount_id }) => Some(discount_id),
            _ => None,
        };

        match req.settlement {
            Settlement::Immediate => {
                let (ticket, transaction, booking) = self
                    .settle(
                        &ctx,
                        &product,
                        option,
                        &quote,
                        discount_id,
                        member_id,
                        guest.clone(),
                        None,
                        PaymentMethod::Card,
                    )
                    .await?;
                notify::dispatch(
                    self.notifier.clone(),
                    NotificationEvent {
                        kind: NotificationKind::TicketPurchased,
                        member_id,
                        title: "Purchase complete".into(),
                        body: format!("{} issued and seat confirmed.", ticket_label(&product, option)),
                    },
                );
                Ok(PurchaseOutcome::Booked {
                    booking,
                    ticket,
                    transaction,
                })
            }
            Settlement::HostedCheckout => {
                // Nothing persists here: the widget's success callback
                // re-enters purchase_and_book as Immediate with the
                // confirmed amount.
                let checkout = CheckoutOrder {
                    amount: quote.final_price,
                    order_id: Uuid::new_v4(),
                    order_name: ticket_label(&product, option),
                    success_url: self.checkout_urls.success_url.clone(),
                    fail_url: self.checkout_urls.fail_url.clone(),
                    customer_key: member_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "guest".into()),
                };
                Ok(PurchaseOutcome::CheckoutPrepared { checkout })
            }
            Settlement::BankTransfer => {
                let order = self
                    .store
                    .insert_order(NewOrder {
                        academy_id: product.academy_id,
                        member_id,
                        product_id: product.id,
                        session_id: Some(req.session_id),
                        count_option_index: req.count_option_index.map(|i| i as i32),
                        discount_id,
                        original_price: quote.original,
                        discount_amount: quote.discount,
                        final_price: quote.final_price,
                        guest,
                    })
                    .await?;
                info!(order_id = %order.id, "bank transfer order created");
                Ok(PurchaseOutcome::Deferred { order })
            }
        }
    }

    /// The shared settlement sequence: issue the ticket, record the
    /// sale, book the session seat. Compensates (deletes the ledger
    /// row and the ticket) if the booking step fails, so callers see
    /// all-or-nothing.
    #[allow(clippy::too_many_arguments)]
    async fn settle(
        &self,
        ctx: &SessionContext,
        product: &TicketProduct,
        option: Option<&CountOption>,
        quote: &Quote,
        discount_id: Option<Uuid>,
        member_id: Option<Uuid>,
        guest: Option<GuestContact>,
        order_id: Option<Uuid>,
        payment_method: PaymentMethod,
    ) -> Result<(OwnedTicket, RevenueTransaction, Booking), AppError> {
        let today = self.today();
        let terms = validity::compute(product, option, today);

        let ticket = self
            .store
            .insert_owned_ticket(NewOwnedTicket {
                member_id,
                product_id: product.id,
                remaining_count: terms.remaining_count,
                start_date: terms.start_date,
                expiry_date: terms.expiry_date,
            })
            .await?;

        let transaction = match self
            .store
            .insert_revenue(NewRevenue {
                academy_id: product.academy_id,
                member_id,
                product_id: product.id,
                owned_ticket_id: ticket.id,
                discount_id,
                original_price: quote.original,
                discount_amount: quote.discount,
                final_price: quote.final_price,
                payment_method,
                product_name_snapshot: ticket_label(product, option),
                product_kind_snapshot: product.kind,
                valid_days_snapshot: option.and_then(|o| o.valid_days).or(product.valid_days),
                quantity: terms.remaining_count.unwrap_or(1),
                transaction_date: today,
            })
            .await
        {
            Ok(t) => t,
            Err(e) => {
                self.discard_settlement(ticket.id, None).await;
                return Err(e);
            }
        };

        let new = NewBooking {
            session_id: ctx.session.id,
            member_id,
            owned_ticket_id: Some(ticket.id),
            order_id,
            guest,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Completed,
        };
        let booking = match retry_once(|| self.store.insert_booking_guarded(new.clone())).await {
            Ok(b) => b,
            Err(e) => {
                self.discard_settlement(ticket.id, Some(transaction.id)).await;
                return Err(e);
            }
        };

        Ok((ticket, transaction, booking))
    }

    /// Best-effort compensation; deletions are idempotent so a retry
    /// after partial failure is safe.
    async fn discard_settlement(&self, ticket_id: Uuid, transaction_id: Option<Uuid>) {
        if let Some(id) = transaction_id {
            if let Err(e) = self.store.delete_revenue(id).await {
                warn!(transaction_id = %id, error = %e, "failed to discard ledger row");
            }
        }
        if let Err(e) = self.store.delete_owned_ticket(ticket_id).await {
            warn!(ticket_id = %ticket_id, error = %e, "failed to discard issued ticket");
        }
    }

    // -- deferred settlement: confirm and revert ------------------------

    /// Staff verified the deposit: run the immediate-settlement
    /// sequence and link everything it created onto the order.
    pub async fn confirm_deferred_payment(
        &self,
        order_id: Uuid,
        staff_id: Option<Uuid>,
    ) -> Result<ConfirmedOrder, AppError> {
        let order = self.store.order(order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(AppError::OrderNotPending);
        }

        let product = self.store.product(order.product_id).await?;
        let option = resolve_option(&product, order.count_option_index.map(|i| i as usize))?;
        let quote = Quote {
            original: order.original_price,
            discount: order.discount_amount,
            final_price: order.final_price,
        };

        let session_ctx = match order.session_id {
            None => None,
            Some(session_id) => {
                let ctx = self.store.session_context(session_id).await?;
                capacity::ensure_bookable(&ctx, Utc::now())?;
                Some(ctx)
            }
        };

        let guest = match (&order.guest_name, &order.guest_phone) {
            (Some(name), Some(phone)) => Some(GuestContact {
                name: name.clone(),
                phone: phone.clone(),
            }),
            _ => None,
        };

        let (ticket, transaction, booking) = match &session_ctx {
            Some(ctx) => {
                let (ticket, transaction, booking) = self
                    .settle(
                        ctx,
                        &product,
                        option,
                        &quote,
                        order.discount_id,
                        order.member_id,
                        guest,
                        Some(order.id),
                        PaymentMethod::BankTransfer,
                    )
                    .await?;
                (ticket, transaction, Some(booking))
            }
            None => {
                let (ticket, transaction) = self
                    .settle_without_session(&product, option, &quote, &order)
                    .await?;
                (ticket, transaction, None)
            }
        };

        let links = OrderLinks {
            owned_ticket_id: Some(ticket.id),
            revenue_transaction_id: Some(transaction.id),
            confirmed_by: staff_id,
        };
        let order = match self.store.mark_order_confirmed(order.id, links).await {
            Ok(order) => order,
            Err(e) => {
                // A concurrent confirmation won the transition;
                // withdraw everything this one settled.
                if let Err(cleanup_err) = self.store.cancel_bookings_for_ticket(ticket.id).await {
                    warn!(
                        ticket_id = %ticket.id,
                        error = %cleanup_err,
                        "failed to cancel booking from a lost confirmation race"
                    );
                }
                self.discard_settlement(ticket.id, Some(transaction.id)).await;
                return Err(e);
            }
        };

        info!(order_id = %order.id, ticket_id = %ticket.id, "bank transfer confirmed");
        notify::dispatch(
            self.notifier.clone(),
            NotificationEvent {
                kind: NotificationKind::DepositConfirmed,
                member_id: order.member_id,
                title: "Deposit confirmed".into(),
                body: format!("{} has been issued.", transaction.product_name_snapshot),
            },
        );

        Ok(ConfirmedOrder {
            order,
            ticket,
            transaction,
            booking,
        })
    }

    async fn settle_without_session(
        &self,
        product: &TicketProduct,
        option: Option<&CountOption>,
        quote: &Quote,
        order: &BankTransferOrder,
    ) -> Result<(OwnedTicket, RevenueTransaction), AppError> {
        let today = self.today();
        let terms = validity::compute(product, option, today);

        let ticket = self
            .store
            .insert_owned_ticket(NewOwnedTicket {
                member_id: order.member_id,
                product_id: product.id,
                remaining_count: terms.remaining_count,
                start_date: terms.start_date,
                expiry_date: terms.expiry_date,
            })
            .await?;

        match self
            .store
            .insert_revenue(NewRevenue {
                academy_id: product.academy_id,
                member_id: order.member_id,
                product_id: product.id,
                owned_ticket_id: ticket.id,
                discount_id: order.discount_id,
                original_price: quote.original,
                discount_amount: quote.discount,
                final_price: quote.final_price,
                payment_method: PaymentMethod::BankTransfer,
                product_name_snapshot: ticket_label(product, option),
                product_kind_snapshot: product.kind,
                valid_days_snapshot: option.and_then(|o| o.valid_days).or(product.valid_days),
                quantity: terms.remaining_count.unwrap_or(1),
                transaction_date: today,
            })
            .await
        {
            Ok(transaction) => Ok((ticket, transaction)),
            Err(e) => {
                self.discard_settlement(ticket.id, None).await;
                Err(e)
            }
        }
    }

    /// Undo a confirmed bank transfer. Each step is independently
    /// best-effort and tolerant of rows a previous partial attempt
    /// already removed, so retrying is always safe.
    pub async fn revert_deferred_payment(&self, order_id: Uuid) -> Result<(), AppError> {
        let order = self.store.order(order_id).await?;

        if order.status != OrderStatus::Confirmed {
            // Never confirmed: nothing to revert. A previously
            // reverted order (confirmed_at retained as audit) is a
            // no-op repeat, not an error.
            if order.confirmed_at.is_none() {
                return Err(AppError::OrderNotConfirmed);
            }
            if order.owned_ticket_id.is_none() && order.revenue_transaction_id.is_none() {
                info!(order_id = %order_id, "revert repeated on already-reverted order");
                return Ok(());
            }
        }

        // 1) The order's own booking goes back to unpaid-pending and
        //    frees its seat.
        if let Some(booking) = self.store.booking_for_order(order.id).await? {
            self.store.detach_booking_funding(booking.id).await?;
        }

        // 2) Other bookings funded by the same ticket are cancelled,
        //    then the ticket itself is withdrawn.
        if let Some(ticket_id) = order.owned_ticket_id {
            self.store.cancel_bookings_for_ticket(ticket_id).await?;
            self.store.delete_owned_ticket(ticket_id).await?;
        }

        // 3) The sale never happened.
        if let Some(transaction_id) = order.revenue_transaction_id {
            self.store.delete_revenue(transaction_id).await?;
        }

        // 4) Back to deposit-pending with links cleared.
        self.store.reset_order(order.id).await?;

        info!(order_id = %order_id, "bank transfer confirmation reverted");
        notify::dispatch(
            self.notifier.clone(),
            NotificationEvent {
                kind: NotificationKind::OrderReverted,
                member_id: order.member_id,
                title: "Payment confirmation reverted".into(),
                body: "The deposit confirmation was withdrawn; the order is pending again.".into(),
            },
        );
        Ok(())
    }

    // -- path C: on-site payment ----------------------------------------

    pub async fn book_on_site(
        &self,
        session_id: Uuid,
        guest: GuestContact,
    ) -> Result<Booking, AppError> {
        guest.validate().map_err(AppError::Validation)?;

        let ctx = self.store.session_context(session_id).await?;
        capacity::ensure_bookable(&ctx, Utc::now())?;

        let booker = BookerKey::GuestPhone(guest.phone.clone());
        if self.store.has_booking_for(session_id, &booker).await? {
            return Err(AppError::AlreadyBooked);
        }

        // PENDING holds no seat and touches no inventory; staff
        // reconciles payment on arrival.
        let booking = self
            .store
            .insert_booking_guarded(NewBooking {
                session_id,
                member_id: None,
                owned_ticket_id: None,
                order_id: None,
                guest: Some(guest),
                status: BookingStatus::Pending,
                payment_status: PaymentStatus::Pending,
            })
            .await?;

        info!(booking_id = %booking.id, session_id = %session_id, "on-site booking registered");
        Ok(booking)
    }
}

fn ticket_label(product: &TicketProduct, option: Option<&CountOption>) -> String {
    product.display_name(option)
}

fn resolve_option<'a>(
    product: &'a TicketProduct,
    index: Option<usize>,
) -> Result<Option<&'a CountOption>, AppError> {
    match index {
        None => Ok(None),
        Some(i) => product
            .option(i)
            .map(Some)
            .ok_or_else(|| AppError::Validation("invalid ticket option".into())),
    }
}

/// Transient contention is retried exactly once with a short backoff;
/// every other error surfaces unchanged.
async fn retry_once<T, F, Fut>(op: F) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, AppError>>,
{
    match op().await {
        Err(e) if e.is_retryable() => {
            tokio::time::sleep(RETRY_BACKOFF).await;
            op().await
        }
        other => other,
    }
}
