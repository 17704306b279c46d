//! End-to-end assignment flows against the in-memory backend: bids, invites, the transactional
//! accept, and exclusivity under concurrent responders.
use std::{str::FromStr, sync::Arc};

use chrono::{Duration, Utc};
use dispatch_engine::{
    config::RetryPolicy,
    feed::{ChangeFeedSubscriber, FeedScope},
    match_types::{MatchKind, MatchStatus, NewBid, NewInvite, OrderId, OrderStatusType, RiderId},
    test_utils::{init_test_env, InMemoryBackend, ManualClock},
    timers::InviteTimerRegistry,
    AcceptOutcome, InviteResponse, MatchingGateway, RespondOutcome,
};
use okd_common::Kobo;
use tokio::sync::mpsc;

fn gateway(backend: InMemoryBackend) -> MatchingGateway<InMemoryBackend> {
    MatchingGateway::new(
        backend,
        RetryPolicy { max_attempts: 3, base_delay: std::time::Duration::from_millis(1) },
    )
}

/// Apply everything the backend has pushed so far to the subscriber.
fn drain(feed_rx: &mut mpsc::Receiver<dispatch_engine::FeedEvent>, subscriber: &mut ChangeFeedSubscriber) {
    while let Ok(event) = feed_rx.try_recv() {
        subscriber.apply(event);
    }
}

#[tokio::test]
async fn accepting_a_bid_rejects_every_other_match_and_assigns_the_order() {
    init_test_env();
    let clock = ManualClock::new(Utc::now());
    let backend = InMemoryBackend::new(Arc::new(clock.clone()), Duration::seconds(30));
    let order_id = OrderId::from_str("O1").unwrap();
    let r1 = RiderId::from_str("R1").unwrap();
    let r2 = RiderId::from_str("R2").unwrap();
    backend.seed_order(&order_id, Kobo::from_naira(500)).await;

    let (timers, _fired_rx) = InviteTimerRegistry::new(Arc::new(clock.clone()), 8);
    let (mut subscriber, _records_rx) =
        ChangeFeedSubscriber::new(FeedScope::Order(order_id.clone()), timers.clone());
    let mut feed_rx = backend.subscribe_feed().await;

    let gw = gateway(backend.clone());
    let bid = gw.submit_bid(NewBid::new(order_id.clone(), r1.clone(), Kobo::from_naira(500))).await.unwrap();
    gw.send_invite(NewInvite::new(order_id.clone(), r2.clone(), Kobo::from_naira(600), Duration::seconds(30)))
        .await
        .unwrap();
    drain(&mut feed_rx, &mut subscriber);
    let invite_id = subscriber
        .records()
        .iter()
        .find(|r| r.kind == MatchKind::Invite)
        .map(|r| r.id.clone())
        .expect("invite should be in the set");
    assert!(timers.is_registered(&invite_id));

    assert_eq!(gw.accept_bid(&order_id, &r1).await.unwrap(), AcceptOutcome::Accepted);
    drain(&mut feed_rx, &mut subscriber);

    let records = subscriber.records();
    assert_eq!(records.get(&bid.id).unwrap().status, MatchStatus::Accepted);
    assert_eq!(records.get(&invite_id).unwrap().status, MatchStatus::Rejected);
    assert_eq!(backend.order_status(&order_id).await, Some(OrderStatusType::Assigned));
    // The invite left `Invited`, so its countdown must be gone even though it never ran out.
    assert!(!timers.is_registered(&invite_id));
}

#[tokio::test]
async fn concurrent_accepts_produce_exactly_one_winner() {
    init_test_env();
    let clock = ManualClock::new(Utc::now());
    let backend = InMemoryBackend::new(Arc::new(clock.clone()), Duration::seconds(30));
    let order_id = OrderId::from_str("O1").unwrap();
    let r1 = RiderId::from_str("R1").unwrap();
    let r2 = RiderId::from_str("R2").unwrap();
    backend.seed_order(&order_id, Kobo::from_naira(500)).await;

    let gw = gateway(backend.clone());
    gw.send_invite(NewInvite::new(order_id.clone(), r1.clone(), Kobo::from_naira(600), Duration::seconds(30)))
        .await
        .unwrap();
    gw.send_invite(NewInvite::new(order_id.clone(), r2.clone(), Kobo::from_naira(600), Duration::seconds(30)))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        gw.respond_to_invite(&order_id, &r1, InviteResponse::Accept),
        gw.respond_to_invite(&order_id, &r2, InviteResponse::Accept),
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let winners = outcomes.iter().filter(|o| **o == RespondOutcome::Acknowledged).count();
    assert_eq!(winners, 1, "exactly one concurrent accept may win");

    let records = backend.records_for_order(&order_id).await;
    assert_eq!(records.iter().filter(|r| r.status == MatchStatus::Accepted).count(), 1);
    assert!(records.iter().all(|r| r.is_terminal()), "the loser must be terminal, not left dangling");
    assert_eq!(backend.order_status(&order_id).await, Some(OrderStatusType::Assigned));
}

#[tokio::test]
async fn responding_to_an_expired_invite_is_stale_not_accepted() {
    init_test_env();
    let clock = ManualClock::new(Utc::now());
    let backend = InMemoryBackend::new(Arc::new(clock.clone()), Duration::seconds(30));
    let order_id = OrderId::from_str("O1").unwrap();
    let r1 = RiderId::from_str("R1").unwrap();
    backend.seed_order(&order_id, Kobo::from_naira(500)).await;

    let gw = gateway(backend.clone());
    gw.send_invite(NewInvite::new(order_id.clone(), r1.clone(), Kobo::from_naira(600), Duration::seconds(10)))
        .await
        .unwrap();
    clock.advance(Duration::seconds(11));

    let outcome = gw.respond_to_invite(&order_id, &r1, InviteResponse::Accept).await.unwrap();
    assert_eq!(outcome, RespondOutcome::StaleInvite);

    let records = backend.records_for_order(&order_id).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, MatchStatus::Expired);
    assert_eq!(backend.order_status(&order_id).await, Some(OrderStatusType::Open));
}

#[tokio::test]
async fn bids_on_an_assigned_order_are_rejected_with_a_conflict() {
    init_test_env();
    let clock = ManualClock::new(Utc::now());
    let backend = InMemoryBackend::new(Arc::new(clock.clone()), Duration::seconds(30));
    let order_id = OrderId::from_str("O1").unwrap();
    let r1 = RiderId::from_str("R1").unwrap();
    let r2 = RiderId::from_str("R2").unwrap();
    backend.seed_order(&order_id, Kobo::from_naira(500)).await;

    let gw = gateway(backend.clone());
    gw.submit_bid(NewBid::new(order_id.clone(), r1.clone(), Kobo::from_naira(500))).await.unwrap();
    gw.accept_bid(&order_id, &r1).await.unwrap();

    let result = gw.submit_bid(NewBid::new(order_id.clone(), r2, Kobo::from_naira(450))).await;
    assert!(matches!(result, Err(dispatch_engine::MatchingError::Conflict(_))));
}
