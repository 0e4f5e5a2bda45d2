//! Payment settlement, signed payment QR codes, check-in and membership.

mod common;

use std::sync::Arc;

use chrono::Duration;
use common::{admin, d, staff, user, Harness};

use cinema_server::config::BookingSettings;
use cinema_server::events::BookingEvent;
use cinema_server::models::payment::PaymentFilter;
use cinema_server::models::ticket::{PaymentChannel, PaymentMethod, PaymentStatus, TicketStatus};
use cinema_server::services::payments::{ConfirmQrRequest, CreateIntentRequest};
use cinema_server::services::tickets::BookingRequest;
use cinema_server::services::{ServiceContext, Services};
use cinema_server::signing::{KeyProvider, KeyRing, PaymentQr, QrPayload, QrSigner};
use cinema_server::utils::error::AppError;
use cinema_server::utils::response::Page;

fn qr_booking(h: &Harness, seats: &[&str]) -> BookingRequest {
    BookingRequest {
        payment_method: Some(PaymentMethod::Vietqr),
        ..h.request(seats)
    }
}

fn confirm(intent_id: uuid::Uuid, content: &str) -> ConfirmQrRequest {
    ConfirmQrRequest {
        intent_id: Some(intent_id),
        ticket_id: None,
        qr_content: Some(content.to_string()),
    }
}

#[tokio::test]
async fn test_mark_paid_settles_exactly_once() {
    let h = Harness::new();
    let customer = user();
    let ticket = h
        .services
        .tickets
        .book(&customer, h.happy_path_request())
        .await
        .unwrap()
        .ticket;

    let first = h
        .services
        .payments
        .mark_paid(&staff(), ticket.id, Some(PaymentMethod::Card))
        .await
        .unwrap();
    assert_eq!(first.ticket.payment.channel, Some(PaymentChannel::Counter));
    assert_eq!(first.payment.method, PaymentMethod::Card);

    let err = h
        .services
        .payments
        .mark_paid(&staff(), ticket.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)), "{err:?}");

    let history = h
        .services
        .membership
        .history(&customer, customer.user_id, Page::default())
        .await
        .unwrap();
    assert_eq!(history.total, 1);
    assert_eq!(history.items[0].points, 250);

    let err = h
        .services
        .payments
        .mark_paid(&customer, ticket.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn test_qr_payment_confirms_ticket_and_publishes_events() {
    let h = Harness::new();
    let mut events = h.events.subscribe();
    let customer = user();

    let booking = h
        .services
        .tickets
        .book(&customer, qr_booking(&h, &["A1", "A2"]))
        .await
        .unwrap();
    let intent = booking.payment_intent.expect("QR bookings return an intent");
    assert_eq!(intent.amount, d(200_000));
    assert_eq!(intent.currency, "VND");
    assert_eq!(intent.expires_at, common::start_of_test() + Duration::minutes(10));
    let content = intent.qr_content.expect("signed QR content");

    let settlement = h
        .services
        .payments
        .confirm_qr(&customer, confirm(intent.intent_id, &content))
        .await
        .unwrap();
    assert_eq!(settlement.ticket.status, TicketStatus::Confirmed);
    assert_eq!(settlement.ticket.payment.channel, Some(PaymentChannel::App));
    assert_eq!(settlement.payment.method, PaymentMethod::Vietqr);
    assert_eq!(settlement.intent_id, Some(intent.intent_id));
    assert_eq!(settlement.membership.map(|m| m.points), Some(200));

    let err = h
        .services
        .payments
        .confirm_qr(&customer, confirm(intent.intent_id, &content))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{err:?}");

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
        if let BookingEvent::MembershipUpdated(summary) = &event {
            assert_eq!(summary.user_id, customer.user_id);
        }
    }
    assert_eq!(
        names,
        vec!["ticket.updated", "ticket.updated", "membership.updated"]
    );

    let summary = h
        .services
        .membership
        .summary(&customer, customer.user_id)
        .await
        .unwrap();
    assert_eq!(summary.points, 200);
}

#[tokio::test]
async fn test_tampered_qr_is_rejected() {
    let h = Harness::new();
    let customer = user();
    let booking = h
        .services
        .tickets
        .book(&customer, qr_booking(&h, &["A1"]))
        .await
        .unwrap();
    let intent = booking.payment_intent.unwrap();
    let content = intent.qr_content.unwrap();
    let (payload, signature) = content.split_once('.').unwrap();

    // Same fields, cheaper amount, signed with a key the server does not know.
    let forged = QrSigner::new(Arc::new(KeyRing::new(1, "attacker")))
        .sign(&PaymentQr {
            kind: PaymentQr::KIND.to_string(),
            ver: 1,
            intent_hint: "qr".into(),
            ticket_id: booking.ticket.id,
            user_id: customer.user_id,
            method: PaymentMethod::Vietqr,
            amount: d(1),
            currency: "VND".into(),
            exp: intent.expires_at.timestamp(),
        })
        .unwrap();

    let mut bad_signature: Vec<char> = signature.chars().collect();
    bad_signature[0] = if bad_signature[0] == 'A' { 'B' } else { 'A' };
    let bad_signature: String = bad_signature.into_iter().collect();

    for tampered in [
        format!("{}.{}", forged.payload, signature),
        forged.content(),
        format!("{payload}.{bad_signature}"),
    ] {
        let err = h
            .services
            .payments
            .confirm_qr(&customer, confirm(intent.intent_id, &tampered))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)), "{tampered}: {err:?}");
    }

    let ticket = h.services.tickets.get(&customer, booking.ticket.id).await.unwrap();
    assert_eq!(ticket.status, TicketStatus::Pending);

    let err = h
        .services
        .payments
        .confirm_qr(
            &customer,
            ConfirmQrRequest {
                qr_content: None,
                ..confirm(intent.intent_id, "")
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));

    assert!(h
        .services
        .payments
        .confirm_qr(&customer, confirm(intent.intent_id, &content))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_expired_intent_is_marked_and_can_be_replaced() {
    let h = Harness::new();
    let customer = user();
    let booking = h
        .services
        .tickets
        .book(&customer, qr_booking(&h, &["A1"]))
        .await
        .unwrap();
    let intent = booking.payment_intent.unwrap();
    let content = intent.qr_content.unwrap();

    h.clock.advance(Duration::minutes(11));
    let err = h
        .services
        .payments
        .confirm_qr(&customer, confirm(intent.intent_id, &content))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Expired(_)), "{err:?}");

    let err = h
        .services
        .payments
        .confirm_qr(&customer, confirm(intent.intent_id, &content))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{err:?}");

    // The reservation itself is still open for a few more minutes.
    let fresh = h
        .services
        .payments
        .create_intent(
            &customer,
            CreateIntentRequest {
                ticket_id: booking.ticket.id,
                method: None,
                amount: Some(d(100_000)),
            },
        )
        .await
        .unwrap();
    let settlement = h
        .services
        .payments
        .confirm_qr(
            &customer,
            ConfirmQrRequest {
                intent_id: None,
                ticket_id: Some(booking.ticket.id),
                qr_content: fresh.qr_content(),
            },
        )
        .await
        .unwrap();
    assert_eq!(settlement.intent_id, Some(fresh.id));
}

#[tokio::test]
async fn test_new_intent_supersedes_older_one() {
    let h = Harness::new();
    let customer = user();
    let booking = h
        .services
        .tickets
        .book(&customer, qr_booking(&h, &["A1"]))
        .await
        .unwrap();
    let old = booking.payment_intent.unwrap();

    let request = CreateIntentRequest {
        ticket_id: booking.ticket.id,
        method: Some(PaymentMethod::Vietqr),
        amount: None,
    };
    let newer = h
        .services
        .payments
        .create_intent(&customer, request.clone())
        .await
        .unwrap();

    let err = h
        .services
        .payments
        .confirm_qr(&customer, confirm(old.intent_id, &old.qr_content.unwrap()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let err = h
        .services
        .payments
        .create_intent(&user(), request.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = h
        .services
        .payments
        .create_intent(
            &customer,
            CreateIntentRequest {
                amount: Some(d(5)),
                ..request
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));

    assert!(h
        .services
        .payments
        .confirm_qr(&customer, confirm(newer.id, &newer.qr_content().unwrap()))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_total_change_invalidates_intent() {
    let h = Harness::new();
    let customer = user();
    let booking = h
        .services
        .tickets
        .book(&customer, qr_booking(&h, &["A1"]))
        .await
        .unwrap();
    let intent = booking.payment_intent.unwrap();

    h.services
        .tickets
        .add_combo(&customer, booking.ticket.id, h.popcorn.id, 1)
        .await
        .unwrap();

    let err = h
        .services
        .payments
        .confirm_qr(&customer, confirm(intent.intent_id, &intent.qr_content.unwrap()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{err:?}");
}

#[tokio::test]
async fn test_check_in_window_and_repeat_scan() {
    let h = Harness::new();
    let customer = user();
    let door = staff();
    let ticket = h
        .services
        .tickets
        .book(&customer, h.request(&["B4"]))
        .await
        .unwrap()
        .ticket;

    let err = h.services.check_in.issue(&customer, ticket.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    h.services
        .payments
        .mark_paid(&door, ticket.id, Some(PaymentMethod::Cash))
        .await
        .unwrap();
    let pass = h.services.check_in.issue(&customer, ticket.id).await.unwrap();
    assert_eq!(pass.payload.seats, vec!["B4".to_string()]);

    let err = h
        .services
        .check_in
        .verify(&customer, &pass.qr_content)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = h
        .services
        .check_in
        .verify(&door, &pass.qr_content)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)), "too early: {err:?}");

    h.clock.set(h.schedule.start_time - Duration::minutes(10));
    let first = h.services.check_in.verify(&door, &pass.qr_content).await.unwrap();
    assert!(!first.already_checked_in);
    assert_eq!(first.ticket.checked_in_by, Some(door.user_id));

    h.clock.advance(Duration::minutes(5));
    let again = h.services.check_in.verify(&staff(), &pass.qr_content).await.unwrap();
    assert!(again.already_checked_in);
    assert_eq!(again.check_in_time, first.check_in_time);
}

#[tokio::test]
async fn test_check_in_rejects_payment_codes_and_ended_shows() {
    let h = Harness::new();
    let customer = user();
    let booking = h
        .services
        .tickets
        .book(&customer, qr_booking(&h, &["A1"]))
        .await
        .unwrap();
    let payment_qr = booking.payment_intent.unwrap().qr_content.unwrap();
    let err = h
        .services
        .check_in
        .verify(&staff(), &payment_qr)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));

    h.services
        .payments
        .mark_paid(&staff(), booking.ticket.id, None)
        .await
        .unwrap();
    let pass = h
        .services
        .check_in
        .issue(&customer, booking.ticket.id)
        .await
        .unwrap();
    h.clock.set(h.schedule.end_time + Duration::minutes(1));
    let err = h
        .services
        .check_in
        .verify(&staff(), &pass.qr_content)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Expired(_)));
}

#[tokio::test]
async fn test_payments_are_scoped_to_their_owner() {
    let h = Harness::new();
    let alice = user();
    let bob = user();
    for (who, seat) in [(&alice, "A1"), (&bob, "A2")] {
        let ticket = h
            .services
            .tickets
            .book(who, h.request(&[seat]))
            .await
            .unwrap()
            .ticket;
        h.services
            .payments
            .mark_paid(&staff(), ticket.id, None)
            .await
            .unwrap();
    }

    // A user asking for someone else's payments still only sees their own.
    let filter = PaymentFilter {
        user_id: Some(bob.user_id),
        ..PaymentFilter::default()
    };
    let mine = h
        .services
        .payments
        .list_payments(&alice, filter, Page::default())
        .await
        .unwrap();
    assert_eq!(mine.total, 1);
    assert_eq!(mine.items[0].user_id, alice.user_id);

    let all = h
        .services
        .payments
        .list_payments(&admin(), PaymentFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(all.total, 2);

    let refunded = PaymentFilter {
        status: Some(PaymentStatus::Refunded),
        ..PaymentFilter::default()
    };
    let none = h
        .services
        .payments
        .list_payments(&staff(), refunded, Page::default())
        .await
        .unwrap();
    assert_eq!(none.total, 0);

    let err = h
        .services
        .payments
        .get_payment(&bob, mine.items[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn test_reconcile_reports_no_drift_after_settlements() {
    let h = Harness::new();
    let customer = user();
    for seat in ["A1", "A2"] {
        let ticket = h
            .services
            .tickets
            .book(&customer, h.request(&[seat]))
            .await
            .unwrap()
            .ticket;
        h.services
            .payments
            .mark_paid(&staff(), ticket.id, None)
            .await
            .unwrap();
    }

    let report = h.services.membership.reconcile(&admin()).await.unwrap();
    assert_eq!(report.checked, 1);
    assert!(report.drifted.is_empty(), "{:?}", report.drifted);

    let err = h.services.membership.reconcile(&staff()).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn test_pass_issued_before_seat_change_is_refused() {
    let h = Harness::new();
    let customer = user();
    let ticket = h
        .services
        .tickets
        .book(&customer, h.request(&["A1", "A2"]))
        .await
        .unwrap()
        .ticket;
    h.services
        .payments
        .mark_paid(&staff(), ticket.id, None)
        .await
        .unwrap();
    let old_pass = h.services.check_in.issue(&customer, ticket.id).await.unwrap();

    h.services
        .tickets
        .change_seats(&customer, ticket.id, &["B1".into(), "B2".into()])
        .await
        .unwrap();
    h.clock.set(h.schedule.start_time - Duration::minutes(5));

    let err = h
        .services
        .check_in
        .verify(&staff(), &old_pass.qr_content)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "stale pass: {err:?}");

    let pass = h.services.check_in.issue(&customer, ticket.id).await.unwrap();
    let result = h.services.check_in.verify(&staff(), &pass.qr_content).await.unwrap();
    assert_eq!(result.ticket.seat_codes(), vec!["B1".to_string(), "B2".to_string()]);
}

/// A key provider whose current key has been withdrawn.
struct WithdrawnKeys;

impl KeyProvider for WithdrawnKeys {
    fn current_version(&self) -> u32 {
        9
    }

    fn key(&self, _version: u32) -> Option<&[u8]> {
        None
    }
}

#[tokio::test]
async fn test_booking_survives_intent_failure() {
    let h = Harness::new();
    let services = Services::new(ServiceContext {
        store: h.store.clone(),
        clock: h.clock.clone(),
        events: h.events.clone(),
        signer: QrSigner::new(Arc::new(WithdrawnKeys)),
        settings: BookingSettings::default(),
        bank: None,
    });

    let booking = services
        .tickets
        .book(&user(), qr_booking(&h, &["A5"]))
        .await
        .unwrap();
    assert!(booking.payment_intent.is_none());
    assert_eq!(booking.ticket.status, TicketStatus::Pending);

    // The reservation holds its seat and can still be paid at the counter.
    let err = h
        .services
        .tickets
        .book(&user(), h.request(&["A5"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SeatConflict(_)));
    h.services
        .payments
        .mark_paid(&staff(), booking.ticket.id, None)
        .await
        .unwrap();
}
