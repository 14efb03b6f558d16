//! In-memory [`Store`] used by the test suite and the local demo.
//!
//! One mutex over the whole state: every trait operation is a single
//! critical section, which gives the same atomicity the Postgres
//! implementation gets from row locks and transactions.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    BankTransferOrder, Booking, BookingStatus, ClassInfo, Discount, OrderStatus, OwnedTicket,
    PaymentStatus, RevenueTransaction, Session, SessionContext, TicketProduct, TicketStatus,
};
use crate::utils::error::AppError;

use super::{BookerKey, NewBooking, NewOrder, NewOwnedTicket, NewRevenue, OrderLinks, Store};

#[derive(Default)]
struct State {
    sessions: HashMap<Uuid, Session>,
    classes: HashMap<Uuid, ClassInfo>,
    products: HashMap<Uuid, TicketProduct>,
    tickets: HashMap<Uuid, OwnedTicket>,
    bookings: HashMap<Uuid, Booking>,
    revenues: HashMap<Uuid, RevenueTransaction>,
    orders: HashMap<Uuid, BankTransferOrder>,
    discounts: HashMap<Uuid, Discount>,
}

impl State {
    fn recount(&mut self, session_id: Uuid) -> i32 {
        let count = self
            .bookings
            .values()
            .filter(|b| b.session_id == session_id && b.status.occupies_seat())
            .count() as i32;
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.confirmed_seat_count = count;
            session.updated_at = Utc::now();
        }
        count
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock means a panic mid-mutation; tests should
        // fail loudly rather than read torn state.
        self.state.lock().expect("memory store lock poisoned")
    }

    // Seeding helpers for tests and the demo fixture.

    pub fn seed_class(&self, class: ClassInfo) {
        self.lock().classes.insert(class.id, class);
    }

    pub fn seed_session(&self, session: Session) {
        self.lock().sessions.insert(session.id, session);
    }

    pub fn seed_product(&self, product: TicketProduct) {
        self.lock().products.insert(product.id, product);
    }

    pub fn seed_discount(&self, discount: Discount) {
        self.lock().discounts.insert(discount.id, discount);
    }

    pub fn seed_owned_ticket(&self, ticket: OwnedTicket) {
        self.lock().tickets.insert(ticket.id, ticket);
    }

    // Direct inspection for assertions.

    pub fn session(&self, id: Uuid) -> Option<Session> {
        self.lock().sessions.get(&id).cloned()
    }

    pub fn ticket(&self, id: Uuid) -> Option<OwnedTicket> {
        self.lock().tickets.get(&id).cloned()
    }

    pub fn booking(&self, id: Uuid) -> Option<Booking> {
        self.lock().bookings.get(&id).cloned()
    }

    pub fn revenue(&self, id: Uuid) -> Option<RevenueTransaction> {
        self.lock().revenues.get(&id).cloned()
    }

    pub fn revenue_count(&self) -> usize {
        self.lock().revenues.len()
    }

    pub fn ticket_count(&self) -> usize {
        self.lock().tickets.len()
    }

    pub fn bookings_for_session(&self, session_id: Uuid) -> Vec<Booking> {
        self.lock()
            .bookings
            .values()
            .filter(|b| b.session_id == session_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn session_context(&self, session_id: Uuid) -> Result<SessionContext, AppError> {
        let state = self.lock();
        let session = state
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or(AppError::SessionNotFound)?;
        let class = state
            .classes
            .get(&session.class_id)
            .cloned()
            .ok_or(AppError::SessionNotFound)?;
        Ok(SessionContext { session, class })
    }

    async fn product(&self, product_id: Uuid) -> Result<TicketProduct, AppError> {
        self.lock()
            .products
            .get(&product_id)
            .cloned()
            .ok_or(AppError::ProductNotFound)
    }

    async fn owned_tickets_for_member(
        &self,
        member_id: Uuid,
    ) -> Result<Vec<(OwnedTicket, TicketProduct)>, AppError> {
        let state = self.lock();
        let mut out = Vec::new();
        for ticket in state.tickets.values() {
            if ticket.member_id != Some(member_id) || ticket.status != TicketStatus::Active {
                continue;
            }
            if let Some(product) = state.products.get(&ticket.product_id) {
                out.push((ticket.clone(), product.clone()));
            }
        }
        out.sort_by_key(|(t, _)| std::cmp::Reverse(t.created_at));
        Ok(out)
    }

    async fn owned_ticket(&self, ticket_id: Uuid) -> Result<OwnedTicket, AppError> {
        self.lock()
            .tickets
            .get(&ticket_id)
            .cloned()
            .ok_or(AppError::TicketNotEligible)
    }

    async fn products_on_sale(&self, academy_id: Uuid) -> Result<Vec<TicketProduct>, AppError> {
        Ok(self
            .lock()
            .products
            .values()
            .filter(|p| p.academy_id == academy_id && p.is_on_sale)
            .cloned()
            .collect())
    }

    async fn discount(&self, discount_id: Uuid) -> Result<Discount, AppError> {
        self.lock()
            .discounts
            .get(&discount_id)
            .cloned()
            .ok_or_else(|| AppError::InvalidDiscount("unknown policy".into()))
    }

    async fn order(&self, order_id: Uuid) -> Result<BankTransferOrder, AppError> {
        self.lock()
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(AppError::OrderNotFound)
    }

    async fn has_booking_for(
        &self,
        session_id: Uuid,
        booker: &BookerKey,
    ) -> Result<bool, AppError> {
        let state = self.lock();
        Ok(state.bookings.values().any(|b| {
            b.session_id == session_id
                && b.status != BookingStatus::Cancelled
                && match booker {
                    BookerKey::Member(id) => b.member_id == Some(*id),
                    BookerKey::GuestPhone(phone) => b.guest_phone.as_deref() == Some(phone),
                }
        }))
    }

    async fn booking_for_order(&self, order_id: Uuid) -> Result<Option<Booking>, AppError> {
        Ok(self
            .lock()
            .bookings
            .values()
            .find(|b| b.order_id == Some(order_id))
            .cloned())
    }

    async fn consume_ticket_unit(&self, ticket_id: Uuid) -> Result<(), AppError> {
        let mut state = self.lock();
        let ticket = state
            .tickets
            .get_mut(&ticket_id)
            .ok_or(AppError::TicketNotEligible)?;
        match ticket.remaining_count {
            None => Ok(()),
            Some(n) if n > 0 => {
                ticket.remaining_count = Some(n - 1);
                if n - 1 == 0 {
                    ticket.status = TicketStatus::Used;
                }
                ticket.updated_at = Utc::now();
                Ok(())
            }
            Some(_) => Err(AppError::TicketExhausted),
        }
    }

    async fn restore_ticket_unit(&self, ticket_id: Uuid) -> Result<(), AppError> {
        let mut state = self.lock();
        if let Some(ticket) = state.tickets.get_mut(&ticket_id) {
            if let Some(n) = ticket.remaining_count {
                ticket.remaining_count = Some(n + 1);
                ticket.status = TicketStatus::Active;
                ticket.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn insert_booking_guarded(&self, new: NewBooking) -> Result<Booking, AppError> {
        let mut state = self.lock();
        let session = state
            .sessions
            .get(&new.session_id)
            .ok_or(AppError::SessionNotFound)?;
        // Same duplicate guard the Postgres partial unique index
        // enforces: one live booking per booker per session.
        let guest_phone = new.guest.as_ref().map(|g| g.phone.as_str());
        let duplicate = state.bookings.values().any(|b| {
            b.session_id == new.session_id
                && b.status != BookingStatus::Cancelled
                && ((new.member_id.is_some() && b.member_id == new.member_id)
                    || (guest_phone.is_some() && b.guest_phone.as_deref() == guest_phone))
        });
        if duplicate {
            return Err(AppError::AlreadyBooked);
        }

        if new.status.occupies_seat() {
            let occupied = state
                .bookings
                .values()
                .filter(|b| b.session_id == new.session_id && b.status.occupies_seat())
                .count() as i32;
            if occupied >= session.max_seats {
                return Err(AppError::CapacityExceeded);
            }
        }
        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            session_id: new.session_id,
            member_id: new.member_id,
            owned_ticket_id: new.owned_ticket_id,
            order_id: new.order_id,
            guest_name: new.guest.as_ref().map(|g| g.name.clone()),
            guest_phone: new.guest.as_ref().map(|g| g.phone.clone()),
            status: new.status,
            payment_status: new.payment_status,
            created_at: now,
            updated_at: now,
        };
        state.bookings.insert(booking.id, booking.clone());
        state.recount(new.session_id);
        Ok(booking)
    }

    async fn recount_session_seats(&self, session_id: Uuid) -> Result<i32, AppError> {
        Ok(self.lock().recount(session_id))
    }

    async fn insert_owned_ticket(&self, new: NewOwnedTicket) -> Result<OwnedTicket, AppError> {
        let now = Utc::now();
        let ticket = OwnedTicket {
            id: Uuid::new_v4(),
            member_id: new.member_id,
            product_id: new.product_id,
            remaining_count: new.remaining_count,
            start_date: new.start_date,
            expiry_date: new.expiry_date,
            status: TicketStatus::Active,
            created_at: now,
            updated_at: now,
        };
        self.lock().tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn delete_owned_ticket(&self, ticket_id: Uuid) -> Result<(), AppError> {
        self.lock().tickets.remove(&ticket_id);
        Ok(())
    }

    async fn insert_revenue(&self, new: NewRevenue) -> Result<RevenueTransaction, AppError> {
        let now = Utc::now();
        let row = RevenueTransaction {
            id: Uuid::new_v4(),
            academy_id: new.academy_id,
            member_id: new.member_id,
            product_id: new.product_id,
            owned_ticket_id: new.owned_ticket_id,
            discount_id: new.discount_id,
            original_price: new.original_price,
            discount_amount: new.discount_amount,
            final_price: new.final_price,
            payment_method: new.payment_method,
            product_name_snapshot: new.product_name_snapshot,
            product_kind_snapshot: new.product_kind_snapshot,
            valid_days_snapshot: new.valid_days_snapshot,
            quantity: new.quantity,
            transaction_date: new.transaction_date,
            created_at: now,
        };
        self.lock().revenues.insert(row.id, row.clone());
        Ok(row)
    }

    async fn delete_revenue(&self, transaction_id: Uuid) -> Result<(), AppError> {
        self.lock().revenues.remove(&transaction_id);
        Ok(())
    }

    async fn insert_order(&self, new: NewOrder) -> Result<BankTransferOrder, AppError> {
        let now = Utc::now();
        let order = BankTransferOrder {
            id: Uuid::new_v4(),
            academy_id: new.academy_id,
            member_id: new.member_id,
            product_id: new.product_id,
            session_id: new.session_id,
            count_option_index: new.count_option_index,
            discount_id: new.discount_id,
            original_price: new.original_price,
            discount_amount: new.discount_amount,
            final_price: new.final_price,
            guest_name: new.guest.as_ref().map(|g| g.name.clone()),
            guest_phone: new.guest.as_ref().map(|g| g.phone.clone()),
            status: OrderStatus::Pending,
            owned_ticket_id: None,
            revenue_transaction_id: None,
            confirmed_at: None,
            confirmed_by: None,
            created_at: now,
            updated_at: now,
        };
        self.lock().orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn mark_order_confirmed(
        &self,
        order_id: Uuid,
        links: OrderLinks,
    ) -> Result<BankTransferOrder, AppError> {
        let mut state = self.lock();
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(AppError::OrderNotFound)?;
        if order.status != OrderStatus::Pending {
            return Err(AppError::OrderNotPending);
        }
        let now = Utc::now();
        order.status = OrderStatus::Confirmed;
        order.owned_ticket_id = links.owned_ticket_id;
        order.revenue_transaction_id = links.revenue_transaction_id;
        order.confirmed_at = Some(now);
        order.confirmed_by = links.confirmed_by;
        order.updated_at = now;
        Ok(order.clone())
    }

    async fn reset_order(&self, order_id: Uuid) -> Result<BankTransferOrder, AppError> {
        let mut state = self.lock();
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(AppError::OrderNotFound)?;
        order.status = OrderStatus::Pending;
        order.owned_ticket_id = None;
        order.revenue_transaction_id = None;
        order.confirmed_by = None;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn detach_booking_funding(&self, booking_id: Uuid) -> Result<(), AppError> {
        let mut state = self.lock();
        let session_id = match state.bookings.get_mut(&booking_id) {
            // Already gone: reversal retries must not error.
            None => return Ok(()),
            Some(booking) => {
                booking.status = BookingStatus::Pending;
                booking.payment_status = PaymentStatus::Pending;
                booking.owned_ticket_id = None;
                booking.updated_at = Utc::now();
                booking.session_id
            }
        };
        state.recount(session_id);
        Ok(())
    }

    async fn cancel_bookings_for_ticket(&self, ticket_id: Uuid) -> Result<(), AppError> {
        let mut state = self.lock();
        let mut touched = Vec::new();
        for booking in state.bookings.values_mut() {
            if booking.owned_ticket_id == Some(ticket_id)
                && booking.status != BookingStatus::Cancelled
            {
                booking.status = BookingStatus::Cancelled;
                booking.owned_ticket_id = None;
                booking.updated_at = Utc::now();
                touched.push(booking.session_id);
            }
        }
        for session_id in touched {
            state.recount(session_id);
        }
        Ok(())
    }
}
