//! End-to-end orchestration tests against the in-memory store.
//!
//! The memory store gives each trait operation the same atomicity the
//! Postgres implementation gets from row locks, so the concurrency
//! properties exercised here hold for both backends.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use uuid::Uuid;

use studio_server::core::orchestrator::{
    CheckoutUrls, Identity, Orchestrator, PurchaseOutcome, PurchaseRequest, Settlement,
};
use studio_server::models::{
    BookingStatus, ClassInfo, CountOption, Discount, DiscountKind, DiscountSpec, GuestContact,
    OrderStatus, OwnedTicket, PaymentStatus, Session, TicketCategory, TicketKind, TicketProduct,
    TicketStatus,
};
use studio_server::notify::LogNotifier;
use studio_server::store::memory::MemoryStore;
use studio_server::store::{NewBooking, Store};
use studio_server::utils::error::AppError;

fn orchestrator(store: Arc<MemoryStore>) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        store,
        Arc::new(LogNotifier),
        CheckoutUrls {
            success_url: "http://localhost:3000/checkout/success".into(),
            fail_url: "http://localhost:3000/checkout/fail".into(),
        },
    ))
}

struct Fixture {
    store: Arc<MemoryStore>,
    orch: Arc<Orchestrator>,
    academy_id: Uuid,
    class_id: Uuid,
    session_id: Uuid,
}

fn fixture(max_seats: i32) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let academy_id = Uuid::new_v4();
    let class_id = Uuid::new_v4();
    let session_id = Uuid::new_v4();
    let now = Utc::now();

    store.seed_class(ClassInfo {
        id: class_id,
        academy_id,
        title: "Evening class".into(),
        allow_general: true,
        allow_coupon: false,
        allow_popup: false,
    });
    store.seed_session(Session {
        id: session_id,
        class_id,
        start_time: now + Duration::hours(2),
        end_time: now + Duration::hours(3),
        max_seats,
        confirmed_seat_count: 0,
        is_canceled: false,
        created_at: now,
        updated_at: now,
    });

    let orch = orchestrator(store.clone());
    Fixture {
        store,
        orch,
        academy_id,
        class_id,
        session_id,
    }
}

fn general_product(academy_id: Uuid, price: i64, total_count: Option<i32>) -> TicketProduct {
    let now = Utc::now();
    TicketProduct {
        id: Uuid::new_v4(),
        academy_id,
        class_id: None,
        name: "General pass".into(),
        kind: if total_count.is_some() {
            TicketKind::Count
        } else {
            TicketKind::Period
        },
        category: TicketCategory::Regular,
        price: Decimal::from(price),
        total_count,
        valid_days: Some(90),
        is_general: true,
        is_coupon: false,
        is_on_sale: true,
        is_public: true,
        count_options: Json(Vec::new()),
        created_at: now,
        updated_at: now,
    }
}

fn owned_ticket(member_id: Uuid, product_id: Uuid, remaining: Option<i32>) -> OwnedTicket {
    let now = Utc::now();
    OwnedTicket {
        id: Uuid::new_v4(),
        member_id: Some(member_id),
        product_id,
        remaining_count: remaining,
        start_date: now.date_naive(),
        expiry_date: Some(now.date_naive() + Duration::days(30)),
        status: TicketStatus::Active,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn booking_with_count_ticket_decrements_and_confirms() {
    let fx = fixture(20);
    let member_id = Uuid::new_v4();
    let product = general_product(fx.academy_id, 100_000, Some(3));
    let ticket = owned_ticket(member_id, product.id, Some(3));
    fx.store.seed_product(product);
    fx.store.seed_owned_ticket(ticket.clone());

    let booking = fx
        .orch
        .book_with_ticket(fx.session_id, ticket.id, member_id)
        .await
        .unwrap();

    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.payment_status, PaymentStatus::Completed);
    assert_eq!(booking.owned_ticket_id, Some(ticket.id));
    assert_eq!(
        fx.store.ticket(ticket.id).unwrap().remaining_count,
        Some(2)
    );
    assert_eq!(fx.store.session(fx.session_id).unwrap().confirmed_seat_count, 1);
}

#[tokio::test]
async fn period_ticket_is_not_decremented() {
    let fx = fixture(20);
    let member_id = Uuid::new_v4();
    let product = general_product(fx.academy_id, 100_000, None);
    let ticket = owned_ticket(member_id, product.id, None);
    fx.store.seed_product(product);
    fx.store.seed_owned_ticket(ticket.clone());

    fx.orch
        .book_with_ticket(fx.session_id, ticket.id, member_id)
        .await
        .unwrap();

    assert_eq!(fx.store.ticket(ticket.id).unwrap().remaining_count, None);
}

#[tokio::test]
async fn exhausted_ticket_is_rejected() {
    let fx = fixture(20);
    let member_id = Uuid::new_v4();
    let product = general_product(fx.academy_id, 100_000, Some(10));
    let ticket = owned_ticket(member_id, product.id, Some(0));
    fx.store.seed_product(product);
    fx.store.seed_owned_ticket(ticket.clone());

    let err = fx
        .orch
        .book_with_ticket(fx.session_id, ticket.id, member_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TicketExhausted));
}

#[tokio::test]
async fn double_booking_same_session_is_rejected() {
    let fx = fixture(20);
    let member_id = Uuid::new_v4();
    let product = general_product(fx.academy_id, 100_000, Some(5));
    let ticket = owned_ticket(member_id, product.id, Some(5));
    fx.store.seed_product(product);
    fx.store.seed_owned_ticket(ticket.clone());

    fx.orch
        .book_with_ticket(fx.session_id, ticket.id, member_id)
        .await
        .unwrap();
    let err = fx
        .orch
        .book_with_ticket(fx.session_id, ticket.id, member_id)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::AlreadyBooked));
    // The failed attempt must not burn a unit.
    assert_eq!(fx.store.ticket(ticket.id).unwrap().remaining_count, Some(4));
}

#[tokio::test]
async fn full_session_rejects_and_restores_the_consumed_unit() {
    let fx = fixture(1);
    let product = general_product(fx.academy_id, 100_000, Some(5));
    fx.store.seed_product(product.clone());

    let first = Uuid::new_v4();
    let first_ticket = owned_ticket(first, product.id, Some(5));
    fx.store.seed_owned_ticket(first_ticket.clone());
    fx.orch
        .book_with_ticket(fx.session_id, first_ticket.id, first)
        .await
        .unwrap();

    let second = Uuid::new_v4();
    let second_ticket = owned_ticket(second, product.id, Some(5));
    fx.store.seed_owned_ticket(second_ticket.clone());
    let err = fx
        .orch
        .book_with_ticket(fx.session_id, second_ticket.id, second)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::CapacityExceeded));
    assert_eq!(
        fx.store.ticket(second_ticket.id).unwrap().remaining_count,
        Some(5)
    );
    assert_eq!(fx.store.session(fx.session_id).unwrap().confirmed_seat_count, 1);
}

#[tokio::test]
async fn parallel_bookings_never_exceed_the_seat_cap() {
    let fx = fixture(1);
    let product = general_product(fx.academy_id, 100_000, Some(5));
    fx.store.seed_product(product.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let member_id = Uuid::new_v4();
        let ticket = owned_ticket(member_id, product.id, Some(5));
        fx.store.seed_owned_ticket(ticket.clone());
        let orch = fx.orch.clone();
        let session_id = fx.session_id;
        handles.push(tokio::spawn(async move {
            orch.book_with_ticket(session_id, ticket.id, member_id).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }

    assert_eq!(successes, 1);
    let confirmed = fx
        .store
        .bookings_for_session(fx.session_id)
        .iter()
        .filter(|b| b.status.occupies_seat())
        .count();
    assert_eq!(confirmed, 1);
    assert_eq!(fx.store.session(fx.session_id).unwrap().confirmed_seat_count, 1);
}

#[tokio::test]
async fn parallel_spends_of_a_last_unit_consume_it_once() {
    // Same member, one remaining unit, two different sessions.
    let fx = fixture(20);
    let other_session = Uuid::new_v4();
    let now = Utc::now();
    fx.store.seed_session(Session {
        id: other_session,
        class_id: fx.class_id,
        start_time: now + Duration::hours(4),
        end_time: now + Duration::hours(5),
        max_seats: 20,
        confirmed_seat_count: 0,
        is_canceled: false,
        created_at: now,
        updated_at: now,
    });

    let member_id = Uuid::new_v4();
    let product = general_product(fx.academy_id, 100_000, Some(1));
    let ticket = owned_ticket(member_id, product.id, Some(1));
    fx.store.seed_product(product);
    fx.store.seed_owned_ticket(ticket.clone());

    let a = {
        let orch = fx.orch.clone();
        let session = fx.session_id;
        let ticket_id = ticket.id;
        tokio::spawn(async move { orch.book_with_ticket(session, ticket_id, member_id).await })
    };
    let b = {
        let orch = fx.orch.clone();
        let ticket_id = ticket.id;
        tokio::spawn(async move { orch.book_with_ticket(other_session, ticket_id, member_id).await })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    // The loser sees the unit gone, not some other failure.
    let loser = results.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(loser, Err(AppError::TicketExhausted)));
    assert_eq!(fx.store.ticket(ticket.id).unwrap().remaining_count, Some(0));
}

#[tokio::test]
async fn last_seat_of_a_nearly_full_session() {
    let fx = fixture(20);

    // 19 confirmed bookings already on the books.
    for _ in 0..19 {
        fx.store
            .insert_booking_guarded(NewBooking {
                session_id: fx.session_id,
                member_id: Some(Uuid::new_v4()),
                owned_ticket_id: None,
                order_id: None,
                guest: None,
                status: BookingStatus::Confirmed,
                payment_status: PaymentStatus::Completed,
            })
            .await
            .unwrap();
    }

    let member_id = Uuid::new_v4();
    let product = general_product(fx.academy_id, 100_000, Some(3));
    let ticket = owned_ticket(member_id, product.id, Some(3));
    fx.store.seed_product(product);
    fx.store.seed_owned_ticket(ticket.clone());

    fx.orch
        .book_with_ticket(fx.session_id, ticket.id, member_id)
        .await
        .unwrap();

    assert_eq!(fx.store.session(fx.session_id).unwrap().confirmed_seat_count, 20);
    assert_eq!(fx.store.ticket(ticket.id).unwrap().remaining_count, Some(2));

    // Seat 21 does not exist.
    let late = Uuid::new_v4();
    let late_ticket = owned_ticket(late, ticket.product_id, Some(3));
    fx.store.seed_owned_ticket(late_ticket.clone());
    let err = fx
        .orch
        .book_with_ticket(fx.session_id, late_ticket.id, late)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::CapacityExceeded));
}

#[tokio::test]
async fn immediate_purchase_issues_ticket_ledger_and_booking() {
    let fx = fixture(20);
    let member_id = Uuid::new_v4();
    let product = general_product(fx.academy_id, 150_000, Some(5));
    fx.store.seed_product(product.clone());

    let outcome = fx
        .orch
        .purchase_and_book(
            PurchaseRequest {
                session_id: fx.session_id,
                product_id: product.id,
                count_option_index: None,
                settlement: Settlement::Immediate,
                discount: None,
                guest: None,
            },
            Identity::Member(member_id),
        )
        .await
        .unwrap();

    match outcome {
        PurchaseOutcome::Booked {
            booking,
            ticket,
            transaction,
        } => {
            assert_eq!(booking.status, BookingStatus::Confirmed);
            assert_eq!(ticket.member_id, Some(member_id));
            assert_eq!(ticket.remaining_count, Some(5));
            assert_eq!(transaction.final_price, Decimal::from(150_000));
            assert_eq!(transaction.product_name_snapshot, "General pass");
        }
        other => panic!("expected Booked, got {:?}", other),
    }
    assert_eq!(fx.store.revenue_count(), 1);
    assert_eq!(fx.store.session(fx.session_id).unwrap().confirmed_seat_count, 1);
}

#[tokio::test]
async fn count_option_purchase_snapshots_the_expanded_name() {
    let fx = fixture(20);
    let member_id = Uuid::new_v4();
    let now = Utc::now();
    let product = TicketProduct {
        name: "Workshop pass".into(),
        kind: TicketKind::Count,
        category: TicketCategory::Workshop,
        count_options: Json(vec![
            CountOption {
                count: 1,
                price: Decimal::from(30_000),
                valid_days: Some(30),
            },
            CountOption {
                count: 4,
                price: Decimal::from(100_000),
                valid_days: Some(60),
            },
        ]),
        created_at: now,
        updated_at: now,
        ..general_product(fx.academy_id, 30_000, Some(1))
    };
    fx.store.seed_product(product.clone());

    let outcome = fx
        .orch
        .purchase_and_book(
            PurchaseRequest {
                session_id: fx.session_id,
                product_id: product.id,
                count_option_index: Some(1),
                settlement: Settlement::Immediate,
                discount: None,
                guest: None,
            },
            Identity::Member(member_id),
        )
        .await
        .unwrap();

    match outcome {
        PurchaseOutcome::Booked {
            ticket, transaction, ..
        } => {
            assert_eq!(ticket.remaining_count, Some(4));
            assert_eq!(transaction.original_price, Decimal::from(100_000));
            assert_eq!(transaction.product_name_snapshot, "Workshop pass x4");
            assert_eq!(transaction.quantity, 4);
        }
        other => panic!("expected Booked, got {:?}", other),
    }
}

#[tokio::test]
async fn hosted_checkout_persists_nothing() {
    let fx = fixture(20);
    let member_id = Uuid::new_v4();
    let product = general_product(fx.academy_id, 150_000, Some(5));
    fx.store.seed_product(product.clone());

    let outcome = fx
        .orch
        .purchase_and_book(
            PurchaseRequest {
                session_id: fx.session_id,
                product_id: product.id,
                count_option_index: None,
                settlement: Settlement::HostedCheckout,
                discount: None,
                guest: None,
            },
            Identity::Member(member_id),
        )
        .await
        .unwrap();

    match outcome {
        PurchaseOutcome::CheckoutPrepared { checkout } => {
            assert_eq!(checkout.amount, Decimal::from(150_000));
        }
        other => panic!("expected CheckoutPrepared, got {:?}", other),
    }
    assert_eq!(fx.store.revenue_count(), 0);
    assert!(fx.store.bookings_for_session(fx.session_id).is_empty());
}

#[tokio::test]
async fn on_site_booking_holds_no_seat() {
    let fx = fixture(1);

    let booking = fx
        .orch
        .book_on_site(
            fx.session_id,
            GuestContact {
                name: "Walk-in".into(),
                phone: "010-1234-5678".into(),
            },
        )
        .await
        .unwrap();

    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.payment_status, PaymentStatus::Pending);
    assert_eq!(fx.store.session(fx.session_id).unwrap().confirmed_seat_count, 0);

    // The pending walk-in does not block a paying booking.
    let member_id = Uuid::new_v4();
    let product = general_product(fx.academy_id, 100_000, Some(3));
    let ticket = owned_ticket(member_id, product.id, Some(3));
    fx.store.seed_product(product);
    fx.store.seed_owned_ticket(ticket.clone());
    fx.orch
        .book_with_ticket(fx.session_id, ticket.id, member_id)
        .await
        .unwrap();
}

#[tokio::test]
async fn same_guest_phone_cannot_book_twice() {
    let fx = fixture(20);
    let guest = GuestContact {
        name: "Walk-in".into(),
        phone: "010-1234-5678".into(),
    };

    fx.orch
        .book_on_site(fx.session_id, guest.clone())
        .await
        .unwrap();
    let err = fx
        .orch
        .book_on_site(fx.session_id, guest)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyBooked));
}

fn ten_percent_discount(academy_id: Uuid) -> Discount {
    let now = Utc::now();
    Discount {
        id: Uuid::new_v4(),
        academy_id,
        name: "Early bird".into(),
        kind: DiscountKind::Percent,
        value: Decimal::from(10),
        is_active: true,
        valid_from: None,
        valid_until: None,
        created_at: now,
        updated_at: now,
    }
}

/// Full deferred-settlement lifecycle: guest orders a ten-use pass at
/// a 10% discount, staff confirms the deposit, then reverts it.
#[tokio::test]
async fn bank_transfer_confirm_and_revert_lifecycle() {
    let fx = fixture(20);
    let product = general_product(fx.academy_id, 100_000, Some(10));
    let discount = ten_percent_discount(fx.academy_id);
    fx.store.seed_product(product.clone());
    fx.store.seed_discount(discount.clone());

    let outcome = fx
        .orch
        .purchase_and_book(
            PurchaseRequest {
                session_id: fx.session_id,
                product_id: product.id,
                count_option_index: None,
                settlement: Settlement::BankTransfer,
                discount: Some(DiscountSpec::Policy {
                    discount_id: discount.id,
                }),
                guest: Some(GuestContact {
                    name: "Jamie".into(),
                    phone: "010-9999-0000".into(),
                }),
            },
            Identity::Guest,
        )
        .await
        .unwrap();

    let order = match outcome {
        PurchaseOutcome::Deferred { order } => order,
        other => panic!("expected Deferred, got {:?}", other),
    };
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.original_price, Decimal::from(100_000));
    assert_eq!(order.discount_amount, Decimal::from(10_000));
    assert_eq!(order.final_price, Decimal::from(90_000));
    // Nothing issued yet.
    assert_eq!(fx.store.revenue_count(), 0);
    assert_eq!(fx.store.session(fx.session_id).unwrap().confirmed_seat_count, 0);

    // Revert before confirmation is an error.
    let err = fx.orch.revert_deferred_payment(order.id).await.unwrap_err();
    assert!(matches!(err, AppError::OrderNotConfirmed));

    // Staff confirms the deposit.
    let staff_id = Uuid::new_v4();
    let confirmed = fx
        .orch
        .confirm_deferred_payment(order.id, Some(staff_id))
        .await
        .unwrap();

    assert_eq!(confirmed.order.status, OrderStatus::Confirmed);
    assert_eq!(confirmed.order.confirmed_by, Some(staff_id));
    assert_eq!(confirmed.ticket.remaining_count, Some(10));
    assert_eq!(confirmed.ticket.member_id, None);
    assert_eq!(confirmed.transaction.original_price, Decimal::from(100_000));
    assert_eq!(confirmed.transaction.discount_amount, Decimal::from(10_000));
    assert_eq!(confirmed.transaction.final_price, Decimal::from(90_000));
    let booking = confirmed.booking.expect("session order books a seat");
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.guest_phone.as_deref(), Some("010-9999-0000"));
    assert_eq!(fx.store.session(fx.session_id).unwrap().confirmed_seat_count, 1);

    // Confirming twice is rejected.
    let err = fx
        .orch
        .confirm_deferred_payment(order.id, Some(staff_id))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::OrderNotPending));

    // Revert undoes everything the confirmation created.
    fx.orch.revert_deferred_payment(order.id).await.unwrap();

    assert!(fx.store.ticket(confirmed.ticket.id).is_none());
    assert!(fx.store.revenue(confirmed.transaction.id).is_none());
    assert_eq!(fx.store.revenue_count(), 0);
    let booking = fx.store.booking(booking.id).unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.payment_status, PaymentStatus::Pending);
    assert_eq!(booking.owned_ticket_id, None);
    assert_eq!(fx.store.session(fx.session_id).unwrap().confirmed_seat_count, 0);
    let order = fx.store.order(order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.owned_ticket_id, None);
    assert_eq!(order.revenue_transaction_id, None);

    // Reverting again is a no-op, not an error.
    fx.orch.revert_deferred_payment(order.id).await.unwrap();
}

#[tokio::test]
async fn reverting_cancels_other_bookings_funded_by_the_ticket() {
    let fx = fixture(20);
    let member_id = Uuid::new_v4();
    let product = general_product(fx.academy_id, 100_000, Some(10));
    fx.store.seed_product(product.clone());

    let outcome = fx
        .orch
        .purchase_and_book(
            PurchaseRequest {
                session_id: fx.session_id,
                product_id: product.id,
                count_option_index: None,
                settlement: Settlement::BankTransfer,
                discount: None,
                guest: None,
            },
            Identity::Member(member_id),
        )
        .await
        .unwrap();
    let order = match outcome {
        PurchaseOutcome::Deferred { order } => order,
        other => panic!("expected Deferred, got {:?}", other),
    };

    let confirmed = fx
        .orch
        .confirm_deferred_payment(order.id, None)
        .await
        .unwrap();
    let ticket_id = confirmed.ticket.id;

    // The member spends the same ticket on a second session.
    let other_session = Uuid::new_v4();
    let now = Utc::now();
    fx.store.seed_session(Session {
        id: other_session,
        class_id: fx.class_id,
        start_time: now + Duration::hours(4),
        end_time: now + Duration::hours(5),
        max_seats: 20,
        confirmed_seat_count: 0,
        is_canceled: false,
        created_at: now,
        updated_at: now,
    });
    let second = fx
        .orch
        .book_with_ticket(other_session, ticket_id, member_id)
        .await
        .unwrap();

    // While the ticket lives it shows up as spendable elsewhere.
    let third_session = Uuid::new_v4();
    fx.store.seed_session(Session {
        id: third_session,
        class_id: fx.class_id,
        start_time: now + Duration::hours(6),
        end_time: now + Duration::hours(7),
        max_seats: 20,
        confirmed_seat_count: 0,
        is_canceled: false,
        created_at: now,
        updated_at: now,
    });
    let before = fx
        .orch
        .resolve_eligibility(third_session, Identity::Member(member_id))
        .await
        .unwrap();
    assert!(before.owned_tickets.iter().any(|e| e.ticket.id == ticket_id));

    fx.orch.revert_deferred_payment(order.id).await.unwrap();

    let second = fx.store.booking(second.id).unwrap();
    assert_eq!(second.status, BookingStatus::Cancelled);
    assert_eq!(second.owned_ticket_id, None);
    assert_eq!(fx.store.session(other_session).unwrap().confirmed_seat_count, 0);

    // The reverted ticket no longer appears as spendable.
    let after = fx
        .orch
        .resolve_eligibility(third_session, Identity::Member(member_id))
        .await
        .unwrap();
    assert!(after.owned_tickets.is_empty());
}

#[tokio::test]
async fn concurrent_confirmations_settle_exactly_once() {
    let fx = fixture(20);
    let member_id = Uuid::new_v4();
    let product = general_product(fx.academy_id, 100_000, Some(10));
    fx.store.seed_product(product.clone());

    let outcome = fx
        .orch
        .purchase_and_book(
            PurchaseRequest {
                session_id: fx.session_id,
                product_id: product.id,
                count_option_index: None,
                settlement: Settlement::BankTransfer,
                discount: None,
                guest: None,
            },
            Identity::Member(member_id),
        )
        .await
        .unwrap();
    let order = match outcome {
        PurchaseOutcome::Deferred { order } => order,
        other => panic!("expected Deferred, got {:?}", other),
    };

    // Several staff members confirm the same deposit at once. Only
    // one transition may win; every loser must leave no artifacts.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let orch = fx.orch.clone();
        let order_id = order.id;
        handles.push(tokio::spawn(async move {
            orch.confirm_deferred_payment(order_id, None).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(AppError::OrderNotPending) | Err(AppError::AlreadyBooked) => {}
            Err(other) => panic!("unexpected failure: {:?}", other),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(fx.store.revenue_count(), 1);
    assert_eq!(fx.store.ticket_count(), 1);
    let confirmed = fx
        .store
        .bookings_for_session(fx.session_id)
        .iter()
        .filter(|b| b.status.occupies_seat())
        .count();
    assert_eq!(confirmed, 1);
    assert_eq!(fx.store.session(fx.session_id).unwrap().confirmed_seat_count, 1);

    let order = fx.store.order(order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert!(order.owned_ticket_id.is_some());
    assert!(order.revenue_transaction_id.is_some());
}

#[tokio::test]
async fn parallel_duplicate_purchases_book_once() {
    let fx = fixture(20);
    let member_id = Uuid::new_v4();
    let product = general_product(fx.academy_id, 100_000, Some(5));
    fx.store.seed_product(product.clone());

    let mut handles = Vec::new();
    for _ in 0..2 {
        let orch = fx.orch.clone();
        let req = PurchaseRequest {
            session_id: fx.session_id,
            product_id: product.id,
            count_option_index: None,
            settlement: Settlement::Immediate,
            discount: None,
            guest: None,
        };
        handles.push(tokio::spawn(async move {
            orch.purchase_and_book(req, Identity::Member(member_id)).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(AppError::AlreadyBooked) => {}
            Err(other) => panic!("unexpected failure: {:?}", other),
        }
    }

    // The loser's settlement was fully compensated.
    assert_eq!(successes, 1);
    assert_eq!(fx.store.revenue_count(), 1);
    assert_eq!(fx.store.ticket_count(), 1);
    assert_eq!(fx.store.bookings_for_session(fx.session_id).len(), 1);
}

#[tokio::test]
async fn eligibility_lists_usable_tickets_and_products() {
    let fx = fixture(20);
    let member_id = Uuid::new_v4();
    let product = general_product(fx.academy_id, 100_000, Some(5));
    fx.store.seed_product(product.clone());

    // Usable ticket, plus an exhausted one that must not appear.
    let usable = owned_ticket(member_id, product.id, Some(3));
    let exhausted = owned_ticket(member_id, product.id, Some(0));
    fx.store.seed_owned_ticket(usable.clone());
    fx.store.seed_owned_ticket(exhausted);

    // Off-sale product must not be offered.
    let mut off_sale = general_product(fx.academy_id, 50_000, None);
    off_sale.is_on_sale = false;
    fx.store.seed_product(off_sale);

    let result = fx
        .orch
        .resolve_eligibility(fx.session_id, Identity::Member(member_id))
        .await
        .unwrap();
    assert_eq!(result.owned_tickets.len(), 1);
    assert_eq!(result.purchasable_products.len(), 1);

    // A guest sees products only.
    let result = fx
        .orch
        .resolve_eligibility(fx.session_id, Identity::Guest)
        .await
        .unwrap();
    assert!(result.owned_tickets.is_empty());
    assert_eq!(result.purchasable_products.len(), 1);
}

#[tokio::test]
async fn canceled_and_started_sessions_reject_bookings() {
    let fx = fixture(20);
    let member_id = Uuid::new_v4();
    let product = general_product(fx.academy_id, 100_000, Some(5));
    let ticket = owned_ticket(member_id, product.id, Some(5));
    fx.store.seed_product(product);
    fx.store.seed_owned_ticket(ticket.clone());

    let now = Utc::now();
    let mut session = fx.store.session(fx.session_id).unwrap();
    session.is_canceled = true;
    fx.store.seed_session(session.clone());
    let err = fx
        .orch
        .book_with_ticket(fx.session_id, ticket.id, member_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SessionCanceled));

    session.is_canceled = false;
    session.start_time = now - Duration::hours(2);
    session.end_time = now - Duration::hours(1);
    fx.store.seed_session(session);
    let err = fx
        .orch
        .book_with_ticket(fx.session_id, ticket.id, member_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SessionEnded));
}

#[tokio::test]
async fn expired_ticket_is_rejected_with_its_own_code() {
    let fx = fixture(20);
    let member_id = Uuid::new_v4();
    let product = general_product(fx.academy_id, 100_000, Some(5));
    let mut ticket = owned_ticket(member_id, product.id, Some(5));
    ticket.expiry_date = Some(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
    fx.store.seed_product(product);
    fx.store.seed_owned_ticket(ticket.clone());

    let err = fx
        .orch
        .book_with_ticket(fx.session_id, ticket.id, member_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TicketExpired));
}

#[tokio::test]
async fn inactive_discount_policy_is_rejected() {
    let fx = fixture(20);
    let product = general_product(fx.academy_id, 100_000, Some(10));
    let mut discount = ten_percent_discount(fx.academy_id);
    discount.is_active = false;
    fx.store.seed_product(product.clone());
    fx.store.seed_discount(discount.clone());

    let err = fx
        .orch
        .price_quote(
            product.id,
            None,
            Some(DiscountSpec::Policy {
                discount_id: discount.id,
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidDiscount(_)));
}
