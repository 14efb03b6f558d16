//! Session-level booking pre-checks.
//!
//! These checks fail fast with their taxonomy tag; they are *not* the
//! capacity guarantee. The authoritative check-and-insert happens
//! inside [`Store::insert_booking_guarded`](crate::store::Store), under
//! the session's row lock, so two racers for the last seat cannot both
//! pass.

use chrono::{DateTime, Utc};

use crate::models::SessionContext;
use crate::utils::error::AppError;

pub fn ensure_bookable(ctx: &SessionContext, now: DateTime<Utc>) -> Result<(), AppError> {
    if ctx.session.is_canceled {
        return Err(AppError::SessionCanceled);
    }
    if ctx.session.start_time < now {
        return Err(AppError::SessionEnded);
    }
    if ctx.session.is_full() {
        return Err(AppError::CapacityExceeded);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassInfo, Session};
    use chrono::Duration;
    use uuid::Uuid;

    fn ctx(max: i32, confirmed: i32, canceled: bool, starts_in_mins: i64) -> SessionContext {
        let now = Utc::now();
        let class_id = Uuid::new_v4();
        SessionContext {
            session: Session {
                id: Uuid::new_v4(),
                class_id,
                start_time: now + Duration::minutes(starts_in_mins),
                end_time: now + Duration::minutes(starts_in_mins + 60),
                max_seats: max,
                confirmed_seat_count: confirmed,
                is_canceled: canceled,
                created_at: now,
                updated_at: now,
            },
            class: ClassInfo {
                id: class_id,
                academy_id: Uuid::new_v4(),
                title: "test".into(),
                allow_general: true,
                allow_coupon: false,
                allow_popup: false,
            },
        }
    }

    #[test]
    fn open_session_is_bookable() {
        assert!(ensure_bookable(&ctx(20, 19, false, 60), Utc::now()).is_ok());
    }

    #[test]
    fn canceled_full_and_past_sessions_are_rejected() {
        let now = Utc::now();
        assert!(matches!(
            ensure_bookable(&ctx(20, 5, true, 60), now),
            Err(AppError::SessionCanceled)
        ));
        assert!(matches!(
            ensure_bookable(&ctx(20, 20, false, 60), now),
            Err(AppError::CapacityExceeded)
        ));
        assert!(matches!(
            ensure_bookable(&ctx(20, 5, false, -10), now),
            Err(AppError::SessionEnded)
        ));
    }
}
