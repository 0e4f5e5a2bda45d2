//! Many callers racing for the same seat, payment or voucher.

mod common;

use common::{staff, user, Harness};
use tokio::task::JoinSet;

use cinema_server::models::ticket::{TicketFilter, TicketStatus};
use cinema_server::utils::error::AppError;
use cinema_server::utils::response::Page;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_one_seat_many_bookers_exactly_one_wins() {
    let h = Harness::new();
    let mut tasks = JoinSet::new();
    for _ in 0..100 {
        let services = h.services.clone();
        let request = h.request(&["A1"]);
        tasks.spawn(async move { services.tickets.book(&user(), request).await });
    }

    let (mut won, mut conflicts) = (0, 0);
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => won += 1,
            Err(AppError::SeatConflict(codes)) => {
                assert_eq!(codes, vec!["A1".to_string()]);
                conflicts += 1;
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(conflicts, 99);

    let live = h
        .services
        .tickets
        .list(&staff(), TicketFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(live.total, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_overlapping_selections_never_share_a_seat() {
    let h = Harness::new();
    let selections: Vec<Vec<&str>> = vec![
        vec!["A1", "A2"],
        vec!["A2", "A3"],
        vec!["A3", "A4"],
        vec!["A4", "A1"],
        vec!["B1"],
    ];
    let mut tasks = JoinSet::new();
    for _ in 0..10 {
        for seats in &selections {
            let services = h.services.clone();
            let request = h.request(seats);
            tasks.spawn(async move { services.tickets.book(&user(), request).await });
        }
    }
    while tasks.join_next().await.is_some() {}

    let tickets = h
        .services
        .tickets
        .list(&staff(), TicketFilter::default(), Page::new(1, 100))
        .await
        .unwrap()
        .items;
    let mut seen = std::collections::HashSet::new();
    for ticket in tickets.iter().filter(|t| t.status == TicketStatus::Pending) {
        for code in ticket.seat_codes() {
            assert!(seen.insert(code.clone()), "seat {code} held twice");
        }
    }
    assert!(seen.contains("B1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_mark_paid_settles_once() {
    let h = Harness::new();
    let customer = user();
    let ticket = h
        .services
        .tickets
        .book(&customer, h.happy_path_request())
        .await
        .unwrap()
        .ticket;

    let mut tasks = JoinSet::new();
    for _ in 0..20 {
        let services = h.services.clone();
        tasks.spawn(async move { services.payments.mark_paid(&staff(), ticket.id, None).await });
    }

    let mut settled = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => settled += 1,
            Err(AppError::InvalidState(_)) | Err(AppError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(settled, 1);

    let history = h
        .services
        .membership
        .history(&customer, customer.user_id, Page::default())
        .await
        .unwrap();
    assert_eq!(history.total, 1);
    let summary = h
        .services
        .membership
        .summary(&customer, customer.user_id)
        .await
        .unwrap();
    assert_eq!(summary.points, 250);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_single_use_voucher_race_has_one_winner() {
    let h = Harness::new();
    let customer = user();
    let seats = ["A1", "A2", "A3", "A4", "A5", "A6", "A7", "A8"];
    let mut ids = Vec::new();
    for seat in seats {
        let booking = h
            .services
            .tickets
            .book(&customer, h.request(&[seat]))
            .await
            .unwrap();
        ids.push(booking.ticket.id);
    }

    let mut tasks = JoinSet::new();
    for id in ids {
        let services = h.services.clone();
        tasks.spawn(async move { services.tickets.apply_voucher(&customer, id, "SAVE10").await });
    }

    let mut applied = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => applied += 1,
            Err(AppError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(applied, 1);
}
