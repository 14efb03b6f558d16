//! Postgres [`Store`] backed by sqlx.
//!
//! The two contested contracts are pushed into the database itself:
//! the ticket decrement is a single conditional UPDATE, and the
//! capacity check-and-insert runs inside one transaction holding the
//! session's row lock. Lock/serialization failures surface as the
//! retryable `CONFLICT` tag.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{
    BankTransferOrder, Booking, Discount, OwnedTicket, RevenueTransaction, SessionContext,
    TicketProduct,
};
use crate::models::{ClassInfo, Session};
use crate::utils::error::AppError;

use super::{BookerKey, NewBooking, NewOrder, NewOwnedTicket, NewRevenue, OrderLinks, Store};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn recount_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        session_id: Uuid,
    ) -> Result<i32, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bookings
             WHERE session_id = $1 AND status IN ('CONFIRMED', 'COMPLETED')",
        )
        .bind(session_id)
        .fetch_one(&mut **tx)
        .await?;

        sqlx::query(
            "UPDATE sessions SET confirmed_seat_count = $2, updated_at = now() WHERE id = $1",
        )
        .bind(session_id)
        .bind(count as i32)
        .execute(&mut **tx)
        .await?;

        Ok(count as i32)
    }
}

/// Lock-contention and serialization failures are retryable.
fn map_db_err(e: sqlx::Error) -> AppError {
    if let Some(db) = e.as_database_error() {
        if let Some(code) = db.code() {
            if matches!(code.as_ref(), "40001" | "40P01" | "55P03") {
                return AppError::Conflict;
            }
        }
    }
    AppError::Database(e)
}

#[async_trait]
impl Store for PgStore {
    async fn session_context(&self, session_id: Uuid) -> Result<SessionContext, AppError> {
        let session: Session = sqlx::query_as("SELECT * FROM sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::SessionNotFound)?;

        let class: ClassInfo = sqlx::query_as(
            "SELECT id, academy_id, title, allow_general, allow_coupon, allow_popup
             FROM classes WHERE id = $1",
        )
        .bind(session.class_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::SessionNotFound)?;

        Ok(SessionContext { session, class })
    }

    async fn product(&self, product_id: Uuid) -> Result<TicketProduct, AppError> {
        sqlx::query_as("SELECT * FROM ticket_products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::ProductNotFound)
    }

    async fn owned_tickets_for_member(
        &self,
        member_id: Uuid,
    ) -> Result<Vec<(OwnedTicket, TicketProduct)>, AppError> {
        let tickets: Vec<OwnedTicket> = sqlx::query_as(
            "SELECT * FROM owned_tickets
             WHERE member_id = $1 AND status = 'ACTIVE'
             ORDER BY created_at DESC",
        )
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?;

        let product_ids: Vec<Uuid> = tickets.iter().map(|t| t.product_id).collect();
        let products: Vec<TicketProduct> =
            sqlx::query_as("SELECT * FROM ticket_products WHERE id = ANY($1)")
                .bind(&product_ids)
                .fetch_all(&self.pool)
                .await?;

        Ok(tickets
            .into_iter()
            .filter_map(|ticket| {
                products
                    .iter()
                    .find(|p| p.id == ticket.product_id)
                    .cloned()
                    .map(|product| (ticket, product))
            })
            .collect())
    }

    async fn owned_ticket(&self, ticket_id: Uuid) -> Result<OwnedTicket, AppError> {
        sqlx::query_as("SELECT * FROM owned_tickets WHERE id = $1")
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::TicketNotEligible)
    }

    async fn products_on_sale(&self, academy_id: Uuid) -> Result<Vec<TicketProduct>, AppError> {
        Ok(sqlx::query_as(
            "SELECT * FROM ticket_products
             WHERE academy_id = $1 AND is_on_sale = TRUE
             ORDER BY created_at",
        )
        .bind(academy_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn discount(&self, discount_id: Uuid) -> Result<Discount, AppError> {
        sqlx::query_as("SELECT * FROM discounts WHERE id = $1")
            .bind(discount_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::InvalidDiscount("unknown policy".into()))
    }

    async fn order(&self, order_id: Uuid) -> Result<BankTransferOrder, AppError> {
        sqlx::query_as("SELECT * FROM bank_transfer_orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::OrderNotFound)
    }

    async fn has_booking_for(
        &self,
        session_id: Uuid,
        booker: &BookerKey,
    ) -> Result<bool, AppError> {
        let count: i64 = match booker {
            BookerKey::Member(member_id) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM bookings
                     WHERE session_id = $1 AND member_id = $2 AND status <> 'CANCELLED'",
                )
                .bind(session_id)
                .bind(member_id)
                .fetch_one(&self.pool)
                .await?
            }
            BookerKey::GuestPhone(phone) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM bookings
                     WHERE session_id = $1 AND guest_phone = $2 AND status <> 'CANCELLED'",
                )
                .bind(session_id)
                .bind(phone)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(count > 0)
    }

    async fn booking_for_order(&self, order_id: Uuid) -> Result<Option<Booking>, AppError> {
        Ok(
            sqlx::query_as("SELECT * FROM bookings WHERE order_id = $1")
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn consume_ticket_unit(&self, ticket_id: Uuid) -> Result<(), AppError> {
        // Conditional decrement: never read-then-write.
        let result = sqlx::query(
            "UPDATE owned_tickets
             SET remaining_count = remaining_count - 1,
                 status = CASE WHEN remaining_count - 1 <= 0 THEN 'USED'::ticket_status
                               ELSE status END,
                 updated_at = now()
             WHERE id = $1 AND remaining_count > 0",
        )
        .bind(ticket_id)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // Zero rows: distinguish a period ticket (no-op) from an
        // exhausted or missing one.
        let remaining: Option<Option<i32>> =
            sqlx::query_scalar("SELECT remaining_count FROM owned_tickets WHERE id = $1")
                .bind(ticket_id)
                .fetch_optional(&self.pool)
                .await?;
        match remaining {
            None => Err(AppError::TicketNotEligible),
            Some(None) => Ok(()),
            Some(Some(_)) => Err(AppError::TicketExhausted),
        }
    }

    async fn restore_ticket_unit(&self, ticket_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE owned_tickets
             SET remaining_count = remaining_count + 1,
                 status = 'ACTIVE',
                 updated_at = now()
             WHERE id = $1 AND remaining_count IS NOT NULL",
        )
        .bind(ticket_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_booking_guarded(&self, new: NewBooking) -> Result<Booking, AppError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        // Row lock serializes every check-and-insert for the session.
        let session: Option<Session> =
            sqlx::query_as("SELECT * FROM sessions WHERE id = $1 FOR UPDATE")
                .bind(new.session_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_db_err)?;
        let session = session.ok_or(AppError::SessionNotFound)?;

        if new.status.occupies_seat() {
            let occupied: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM bookings
                 WHERE session_id = $1 AND status IN ('CONFIRMED', 'COMPLETED')",
            )
            .bind(new.session_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_err)?;
            if occupied >= session.max_seats as i64 {
                return Err(AppError::CapacityExceeded);
            }
        }

        let booking: Booking = sqlx::query_as(
            "INSERT INTO bookings
                 (id, session_id, member_id, owned_ticket_id, order_id,
                  guest_name, guest_phone, status, payment_status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(new.session_id)
        .bind(new.member_id)
        .bind(new.owned_ticket_id)
        .bind(new.order_id)
        .bind(new.guest.as_ref().map(|g| g.name.clone()))
        .bind(new.guest.as_ref().map(|g| g.phone.clone()))
        .bind(new.status)
        .bind(new.payment_status)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            // The partial unique index on (session_id, booker)
            // catches duplicates the application check raced past.
            if e.as_database_error()
                .and_then(|db| db.code())
                .is_some_and(|code| code == "23505")
            {
                AppError::AlreadyBooked
            } else {
                map_db_err(e)
            }
        })?;

        Self::recount_in_tx(&mut tx, new.session_id)
            .await
            .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;
        Ok(booking)
    }

    async fn recount_session_seats(&self, session_id: Uuid) -> Result<i32, AppError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        let count = Self::recount_in_tx(&mut tx, session_id)
            .await
            .map_err(map_db_err)?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(count)
    }

    async fn insert_owned_ticket(&self, new: NewOwnedTicket) -> Result<OwnedTicket, AppError> {
        Ok(sqlx::query_as(
            "INSERT INTO owned_tickets
                 (id, member_id, product_id, remaining_count, start_date, expiry_date, status)
             VALUES ($1, $2, $3, $4, $5, $6, 'ACTIVE')
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(new.member_id)
        .bind(new.product_id)
        .bind(new.remaining_count)
        .bind(new.start_date)
        .bind(new.expiry_date)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn delete_owned_ticket(&self, ticket_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM owned_tickets WHERE id = $1")
            .bind(ticket_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_revenue(&self, new: NewRevenue) -> Result<RevenueTransaction, AppError> {
        Ok(sqlx::query_as(
            "INSERT INTO revenue_transactions
                 (id, academy_id, member_id, product_id, owned_ticket_id, discount_id,
                  original_price, discount_amount, final_price, payment_method,
                  product_name_snapshot, product_kind_snapshot, valid_days_snapshot,
                  quantity, transaction_date)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(new.academy_id)
        .bind(new.member_id)
        .bind(new.product_id)
        .bind(new.owned_ticket_id)
        .bind(new.discount_id)
        .bind(new.original_price)
        .bind(new.discount_amount)
        .bind(new.final_price)
        .bind(new.payment_method)
        .bind(new.product_name_snapshot)
        .bind(new.product_kind_snapshot)
        .bind(new.valid_days_snapshot)
        .bind(new.quantity)
        .bind(new.transaction_date)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn delete_revenue(&self, transaction_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM revenue_transactions WHERE id = $1")
            .bind(transaction_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_order(&self, new: NewOrder) -> Result<BankTransferOrder, AppError> {
        Ok(sqlx::query_as(
            "INSERT INTO bank_transfer_orders
                 (id, academy_id, member_id, product_id, session_id, count_option_index,
                  discount_id, original_price, discount_amount, final_price,
                  guest_name, guest_phone, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'PENDING')
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(new.academy_id)
        .bind(new.member_id)
        .bind(new.product_id)
        .bind(new.session_id)
        .bind(new.count_option_index)
        .bind(new.discount_id)
        .bind(new.original_price)
        .bind(new.discount_amount)
        .bind(new.final_price)
        .bind(new.guest.as_ref().map(|g| g.name.clone()))
        .bind(new.guest.as_ref().map(|g| g.phone.clone()))
        .fetch_one(&self.pool)
        .await?)
    }

    async fn mark_order_confirmed(
        &self,
        order_id: Uuid,
        links: OrderLinks,
    ) -> Result<BankTransferOrder, AppError> {
        // Conditional transition: of two racing confirmations, only
        // one UPDATE matches the PENDING row.
        let updated: Option<BankTransferOrder> = sqlx::query_as(
            "UPDATE bank_transfer_orders
             SET status = 'CONFIRMED',
                 owned_ticket_id = $2,
                 revenue_transaction_id = $3,
                 confirmed_at = now(),
                 confirmed_by = $4,
                 updated_at = now()
             WHERE id = $1 AND status = 'PENDING'
             RETURNING *",
        )
        .bind(order_id)
        .bind(links.owned_ticket_id)
        .bind(links.revenue_transaction_id)
        .bind(links.confirmed_by)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(order) => Ok(order),
            None => {
                let exists: Option<bool> =
                    sqlx::query_scalar("SELECT TRUE FROM bank_transfer_orders WHERE id = $1")
                        .bind(order_id)
                        .fetch_optional(&self.pool)
                        .await?;
                match exists {
                    None => Err(AppError::OrderNotFound),
                    Some(_) => Err(AppError::OrderNotPending),
                }
            }
        }
    }

    async fn reset_order(&self, order_id: Uuid) -> Result<BankTransferOrder, AppError> {
        sqlx::query_as(
            "UPDATE bank_transfer_orders
             SET status = 'PENDING',
                 owned_ticket_id = NULL,
                 revenue_transaction_id = NULL,
                 confirmed_by = NULL,
                 updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::OrderNotFound)
    }

    async fn detach_booking_funding(&self, booking_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let session_id: Option<Uuid> = sqlx::query_scalar(
            "UPDATE bookings
             SET status = 'PENDING',
                 payment_status = 'PENDING',
                 owned_ticket_id = NULL,
                 updated_at = now()
             WHERE id = $1
             RETURNING session_id",
        )
        .bind(booking_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_err)?;

        // Absent booking: a retried reversal already handled it.
        if let Some(session_id) = session_id {
            Self::recount_in_tx(&mut tx, session_id)
                .await
                .map_err(map_db_err)?;
        }

        tx.commit().await.map_err(map_db_err)?;
        Ok(())
    }

    async fn cancel_bookings_for_ticket(&self, ticket_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let sessions: Vec<Uuid> = sqlx::query_scalar(
            "UPDATE bookings
             SET status = 'CANCELLED',
                 owned_ticket_id = NULL,
                 updated_at = now()
             WHERE owned_ticket_id = $1 AND status <> 'CANCELLED'
             RETURNING session_id",
        )
        .bind(ticket_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_db_err)?;

        for session_id in sessions {
            Self::recount_in_tx(&mut tx, session_id)
                .await
                .map_err(map_db_err)?;
        }

        tx.commit().await.map_err(map_db_err)?;
        Ok(())
    }
}
