use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use chrono::Duration;
use log::*;
use okd_common::Kobo;
use tokio::sync::{mpsc, Mutex};

use crate::{
    clock::Clock,
    feed::FeedEvent,
    match_types::{
        MatchId, MatchKind, MatchRecord, MatchStatus, NewBid, NewInvite, Order, OrderId, OrderStatusType, RiderId,
    },
    traits::{Ack, BroadcastAck, InviteResponse, MatchingBackend, MatchingError},
};

struct BackendState {
    orders: HashMap<OrderId, Order>,
    records: HashMap<MatchId, MatchRecord>,
    roster: Vec<RiderId>,
    next_id: u64,
    fail_queue: VecDeque<MatchingError>,
    call_counts: HashMap<&'static str, usize>,
    feed_subscribers: Vec<mpsc::Sender<FeedEvent>>,
}

impl BackendState {
    fn next_match_id(&mut self) -> MatchId {
        self.next_id += 1;
        MatchId(format!("m-{}", self.next_id))
    }

    fn holds_outstanding(&self, order_id: &OrderId, rider_id: &RiderId) -> bool {
        self.records
            .values()
            .any(|r| &r.order_id == order_id && &r.rider_id == rider_id && !r.is_terminal())
    }
}

/// An in-memory stand-in for the managed matching backend.
///
/// Mutations happen atomically under one lock, which is what makes the accept operation a true
/// serialization point: the first accept for an order wins, every other record for the order
/// goes terminal in the same step, and the order moves to `Assigned`. Each mutation emits the
/// corresponding change-feed events to all subscribed receivers.
#[derive(Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
    clock: Arc<dyn Clock>,
    invite_ttl: Duration,
}

impl InMemoryBackend {
    pub fn new(clock: Arc<dyn Clock>, invite_ttl: Duration) -> Self {
        let state = BackendState {
            orders: HashMap::new(),
            records: HashMap::new(),
            roster: Vec::new(),
            next_id: 0,
            fail_queue: VecDeque::new(),
            call_counts: HashMap::new(),
            feed_subscribers: Vec::new(),
        };
        Self { state: Arc::new(Mutex::new(state)), clock, invite_ttl }
    }

    pub async fn seed_order(&self, order_id: &OrderId, delivery_fee: Kobo) {
        let now = self.clock.now();
        let order = Order {
            order_id: order_id.clone(),
            status: OrderStatusType::Open,
            delivery_fee,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().await.orders.insert(order_id.clone(), order);
    }

    pub async fn seed_roster(&self, rider_ids: &[&str]) {
        let mut state = self.state.lock().await;
        state.roster = rider_ids.iter().map(|id| RiderId(id.to_string())).collect();
    }

    /// Queue a failure to be returned by the next backend call, ahead of its normal behaviour.
    pub async fn fail_next_with(&self, error: MatchingError) {
        self.state.lock().await.fail_queue.push_back(error);
    }

    pub async fn call_count(&self, op: &str) -> usize {
        *self.state.lock().await.call_counts.get(op).unwrap_or(&0)
    }

    pub async fn order_status(&self, order_id: &OrderId) -> Option<OrderStatusType> {
        self.state.lock().await.orders.get(order_id).map(|o| o.status)
    }

    pub async fn records_for_order(&self, order_id: &OrderId) -> Vec<MatchRecord> {
        let state = self.state.lock().await;
        state.records.values().filter(|r| &r.order_id == order_id).cloned().collect()
    }

    /// Open a change-feed stream carrying every subsequent mutation. Scope filtering is the
    /// subscriber's job, as it is with the real feed.
    pub async fn subscribe_feed(&self) -> mpsc::Receiver<FeedEvent> {
        let (tx, rx) = mpsc::channel(64);
        self.state.lock().await.feed_subscribers.push(tx);
        rx
    }

    async fn enter(&self, op: &'static str) -> Result<(), MatchingError> {
        let mut state = self.state.lock().await;
        *state.call_counts.entry(op).or_insert(0) += 1;
        if let Some(error) = state.fail_queue.pop_front() {
            debug!("🧪️ Injecting {error} into {op}");
            return Err(error);
        }
        Ok(())
    }

    async fn publish(&self, events: Vec<FeedEvent>) {
        let subscribers = self.state.lock().await.feed_subscribers.clone();
        for event in events {
            for tx in &subscribers {
                if tx.send(event.clone()).await.is_err() {
                    trace!("🧪️ A feed subscriber has gone away");
                }
            }
        }
    }

    /// Transactional accept: winner goes `Accepted`, every other record for the order goes
    /// terminal, order goes `Assigned`. Caller must have verified the order is still open.
    fn settle_order(state: &mut BackendState, order_id: &OrderId, winner: &MatchId) -> Vec<FeedEvent> {
        let mut events = Vec::new();
        for record in state.records.values_mut().filter(|r| &r.order_id == order_id) {
            if &record.id == winner {
                record.status = MatchStatus::Accepted;
                events.push(FeedEvent::update(record.clone()));
            } else if !record.is_terminal() {
                record.status = MatchStatus::Rejected;
                events.push(FeedEvent::update(record.clone()));
            }
        }
        if let Some(order) = state.orders.get_mut(order_id) {
            order.status = OrderStatusType::Assigned;
        }
        events
    }
}

impl MatchingBackend for InMemoryBackend {
    async fn submit_bid(&self, bid: NewBid) -> Result<MatchRecord, MatchingError> {
        self.enter("submit_bid").await?;
        let now = self.clock.now();
        let (record, events) = {
            let mut state = self.state.lock().await;
            let order = state
                .orders
                .get(&bid.order_id)
                .ok_or_else(|| MatchingError::OrderNotFound(bid.order_id.clone()))?;
            if order.status != OrderStatusType::Open {
                return Err(MatchingError::Conflict(format!("order {} is {}", bid.order_id, order.status)));
            }
            if state.holds_outstanding(&bid.order_id, &bid.rider_id) {
                return Err(MatchingError::BackendError(format!(
                    "rider {} already holds an open match on order {}",
                    bid.rider_id, bid.order_id
                )));
            }
            let record = MatchRecord {
                id: state.next_match_id(),
                order_id: bid.order_id,
                rider_id: bid.rider_id,
                kind: MatchKind::OpenBid,
                status: MatchStatus::Pending,
                amount: bid.amount,
                created_at: now,
                expires_at: None,
            };
            state.records.insert(record.id.clone(), record.clone());
            (record.clone(), vec![FeedEvent::insert(record)])
        };
        self.publish(events).await;
        Ok(record)
    }

    async fn send_invite(&self, invite: NewInvite) -> Result<Ack, MatchingError> {
        self.enter("send_invite").await?;
        let now = self.clock.now();
        let events = {
            let mut state = self.state.lock().await;
            let order = state
                .orders
                .get(&invite.order_id)
                .ok_or_else(|| MatchingError::OrderNotFound(invite.order_id.clone()))?;
            if order.status != OrderStatusType::Open {
                return Err(MatchingError::Conflict(format!("order {} is {}", invite.order_id, order.status)));
            }
            if state.holds_outstanding(&invite.order_id, &invite.rider_id) {
                return Err(MatchingError::BackendError(format!(
                    "rider {} already holds an open match on order {}",
                    invite.rider_id, invite.order_id
                )));
            }
            let record = MatchRecord {
                id: state.next_match_id(),
                order_id: invite.order_id,
                rider_id: invite.rider_id,
                kind: MatchKind::Invite,
                status: MatchStatus::Invited,
                amount: invite.amount,
                created_at: now,
                expires_at: Some(now + invite.ttl),
            };
            state.records.insert(record.id.clone(), record.clone());
            vec![FeedEvent::insert(record)]
        };
        self.publish(events).await;
        Ok(Ack::at(now))
    }

    async fn respond_to_invite(
        &self,
        order_id: &OrderId,
        rider_id: &RiderId,
        response: InviteResponse,
    ) -> Result<Ack, MatchingError> {
        self.enter("respond_to_invite").await?;
        let now = self.clock.now();
        let events = {
            let mut state = self.state.lock().await;
            let candidates: Vec<MatchRecord> = state
                .records
                .values()
                .filter(|r| &r.order_id == order_id && &r.rider_id == rider_id && r.kind == MatchKind::Invite)
                .cloned()
                .collect();
            // Prefer the live invite; re-invitation creates fresh records, so terminal ones linger.
            let invite = candidates
                .iter()
                .find(|r| r.status == MatchStatus::Invited)
                .cloned()
                .or_else(|| candidates.into_iter().max_by_key(|r| r.created_at))
                .ok_or_else(|| MatchingError::InviteNotFound {
                    order_id: order_id.clone(),
                    rider_id: rider_id.clone(),
                })?;
            if invite.status != MatchStatus::Invited {
                return Err(MatchingError::Stale(format!("invite {} is already {}", invite.id, invite.status)));
            }
            if invite.expires_at.is_some_and(|t| t <= now) {
                // The server expires the record as a side effect; the client must re-fetch.
                let mut expired = invite.clone();
                expired.status = MatchStatus::Expired;
                state.records.insert(expired.id.clone(), expired.clone());
                let event = FeedEvent::update(expired);
                drop(state);
                self.publish(vec![event]).await;
                return Err(MatchingError::Stale(format!("invite {} expired before the response", invite.id)));
            }
            match response {
                InviteResponse::Accept => InMemoryBackend::settle_order(&mut state, order_id, &invite.id),
                InviteResponse::Reject => {
                    let mut rejected = invite.clone();
                    rejected.status = MatchStatus::Rejected;
                    state.records.insert(rejected.id.clone(), rejected.clone());
                    vec![FeedEvent::update(rejected)]
                },
            }
        };
        self.publish(events).await;
        Ok(Ack::at(now))
    }

    async fn accept_bid(&self, order_id: &OrderId, rider_id: &RiderId) -> Result<Ack, MatchingError> {
        self.enter("accept_bid").await?;
        let now = self.clock.now();
        let events = {
            let mut state = self.state.lock().await;
            let order = state
                .orders
                .get(order_id)
                .ok_or_else(|| MatchingError::OrderNotFound(order_id.clone()))?;
            if order.status != OrderStatusType::Open {
                return Err(MatchingError::Conflict(format!("order {order_id} is {}", order.status)));
            }
            let bid = state
                .records
                .values()
                .find(|r| {
                    &r.order_id == order_id
                        && &r.rider_id == rider_id
                        && r.kind == MatchKind::OpenBid
                        && r.status == MatchStatus::Pending
                })
                .cloned()
                .ok_or_else(|| {
                    MatchingError::BackendError(format!("no pending bid by rider {rider_id} on order {order_id}"))
                })?;
            InMemoryBackend::settle_order(&mut state, order_id, &bid.id)
        };
        self.publish(events).await;
        Ok(Ack::at(now))
    }

    async fn mark_expired(&self, order_id: &OrderId) -> Result<(), MatchingError> {
        self.enter("mark_expired").await?;
        let now = self.clock.now();
        let events = {
            let mut state = self.state.lock().await;
            let mut events = Vec::new();
            for record in state.records.values_mut().filter(|r| &r.order_id == order_id) {
                if record.status == MatchStatus::Invited && record.expires_at.is_some_and(|t| t <= now) {
                    record.status = MatchStatus::Expired;
                    events.push(FeedEvent::update(record.clone()));
                }
            }
            events
        };
        self.publish(events).await;
        Ok(())
    }

    async fn broadcast(&self, order_id: &OrderId, amount: Kobo, fanout: usize) -> Result<BroadcastAck, MatchingError> {
        self.enter("broadcast").await?;
        let now = self.clock.now();
        let events = {
            let mut state = self.state.lock().await;
            let order = state
                .orders
                .get(order_id)
                .ok_or_else(|| MatchingError::OrderNotFound(order_id.clone()))?;
            if order.status != OrderStatusType::Open {
                return Err(MatchingError::Conflict(format!("order {order_id} is {}", order.status)));
            }
            let eligible: Vec<RiderId> = state
                .roster
                .iter()
                .filter(|rider| !state.holds_outstanding(order_id, rider))
                .take(fanout)
                .cloned()
                .collect();
            let mut events = Vec::new();
            for rider_id in eligible {
                let record = MatchRecord {
                    id: state.next_match_id(),
                    order_id: order_id.clone(),
                    rider_id,
                    kind: MatchKind::Invite,
                    status: MatchStatus::Invited,
                    amount,
                    created_at: now,
                    // Independent TTL starting now, never inherited from an expired invite.
                    expires_at: Some(now + self.invite_ttl),
                };
                state.records.insert(record.id.clone(), record.clone());
                events.push(FeedEvent::insert(record));
            }
            events
        };
        let invited = events.len();
        self.publish(events).await;
        Ok(BroadcastAck { server_now: now, invited })
    }

    async fn list_rider_invites(&self, rider_id: &RiderId) -> Result<Vec<MatchRecord>, MatchingError> {
        self.enter("list_rider_invites").await?;
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|r| &r.rider_id == rider_id && r.kind == MatchKind::Invite && r.status == MatchStatus::Invited)
            .cloned()
            .collect())
    }
}
