use std::collections::HashSet;

use log::*;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    feed::{FeedEvent, FeedScope},
    match_types::{MatchId, MatchSet, MatchStatus, UpsertOutcome},
    timers::InviteTimerRegistry,
};

/// Consumes one scope's slice of the change feed and owns the local match set.
///
/// The subscriber is the only writer to the set. Gateway calls never touch it; their effects
/// arrive here as feed events, which keeps a single source of truth and makes a stale in-flight
/// call completing after teardown harmless.
pub struct ChangeFeedSubscriber {
    scope: FeedScope,
    seen: HashSet<(MatchId, MatchStatus)>,
    records: MatchSet,
    records_tx: watch::Sender<MatchSet>,
    timers: InviteTimerRegistry,
}

impl ChangeFeedSubscriber {
    /// Create a subscriber for the given scope. The returned watch receiver yields a fresh
    /// snapshot of the match set after every applied event; view models re-derive from it.
    pub fn new(scope: FeedScope, timers: InviteTimerRegistry) -> (Self, watch::Receiver<MatchSet>) {
        let (records_tx, records_rx) = watch::channel(MatchSet::new());
        let subscriber =
            Self { scope, seen: HashSet::new(), records: MatchSet::new(), records_tx, timers };
        (subscriber, records_rx)
    }

    /// Fold one feed event into the match set. Returns true if the set changed.
    ///
    /// Events outside the scope, duplicates, invalid records and stale snapshots are all dropped
    /// here; ordering and redelivery quirks of the feed never escape this method.
    pub fn apply(&mut self, event: FeedEvent) -> bool {
        let record = event.record;
        if !self.scope.matches(&record) {
            trace!("📡️ Ignoring event for match {} outside scope", record.id);
            return false;
        }
        if let Err(e) = record.validate() {
            warn!("📡️ Dropping invalid record from feed: {e}");
            return false;
        }
        if !self.seen.insert((record.id.clone(), record.status)) {
            trace!("📡️ Duplicate delivery of match {} in status {}; dropped", record.id, record.status);
            return false;
        }
        let id = record.id.clone();
        match self.records.upsert(record) {
            UpsertOutcome::Inserted | UpsertOutcome::Updated => {
                // The set holds the authoritative copy now; sync the countdown to it.
                let applied = self.records.get(&id).cloned();
                if let Some(applied) = applied {
                    if applied.status == MatchStatus::Invited {
                        self.timers.register(&applied);
                    } else {
                        self.timers.cancel(&applied.id);
                    }
                    debug!("📡️ Match {} is now {}", applied.id, applied.status);
                }
                let _ = self.records_tx.send(self.records.clone());
                true
            },
            UpsertOutcome::Ignored => false,
        }
    }

    pub fn records(&self) -> &MatchSet {
        &self.records
    }

    /// Start pumping events from the stream. The returned handle owns the pump task; dropping it
    /// (or calling [`SubscriptionHandle::close`]) aborts the pump and cancels all timers.
    pub fn spawn(mut self, mut stream: mpsc::Receiver<FeedEvent>) -> SubscriptionHandle {
        let timers = self.timers.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                self.apply(event);
            }
            debug!("📡️ Change feed stream closed");
        });
        SubscriptionHandle { pump, timer_worker: None, timers }
    }
}

/// Disposable handle to a live feed subscription.
///
/// Teardown is guaranteed on every exit path: explicit [`close`](Self::close), drop at the end
/// of the owning screen's scope, or drop during unwinding all abort the pump task, stop the
/// timer worker and cancel every registered countdown, so no timer can fire after teardown.
pub struct SubscriptionHandle {
    pump: JoinHandle<()>,
    timer_worker: Option<JoinHandle<()>>,
    timers: InviteTimerRegistry,
}

impl SubscriptionHandle {
    /// Adopt the countdown worker so it is torn down together with the subscription.
    pub fn attach_timer_worker(&mut self, worker: JoinHandle<()>) {
        self.timer_worker = Some(worker);
    }

    pub fn close(self) {
        // Teardown happens in Drop.
    }

    fn teardown(&mut self) {
        self.pump.abort();
        if let Some(worker) = self.timer_worker.take() {
            worker.abort();
        }
        self.timers.cancel_all();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.teardown();
        debug!("📡️ Feed subscription torn down");
    }
}

#[cfg(test)]
mod test {
    use std::{str::FromStr, sync::Arc};

    use chrono::{Duration, Utc};
    use okd_common::Kobo;

    use super::*;
    use crate::{
        match_types::{MatchKind, MatchRecord, OrderId, RiderId},
        test_utils::ManualClock,
    };

    fn record(id: &str, kind: MatchKind, status: MatchStatus, expires_at: Option<chrono::DateTime<Utc>>) -> MatchRecord {
        MatchRecord {
            id: MatchId::from_str(id).unwrap(),
            order_id: OrderId::from_str("o1").unwrap(),
            rider_id: RiderId::from_str("r1").unwrap(),
            kind,
            status,
            amount: Kobo::from_naira(500),
            created_at: Utc::now(),
            expires_at,
        }
    }

    fn subscriber() -> (ChangeFeedSubscriber, InviteTimerRegistry) {
        let clock = ManualClock::new(Utc::now());
        let (timers, _fired_rx) = InviteTimerRegistry::new(Arc::new(clock), 8);
        let scope = FeedScope::Order(OrderId::from_str("o1").unwrap());
        let (subscriber, _records_rx) = ChangeFeedSubscriber::new(scope, timers.clone());
        (subscriber, timers)
    }

    #[test]
    fn duplicate_deliveries_are_dropped() {
        let _ = env_logger::try_init();
        let (mut sub, _timers) = subscriber();
        let r = record("m1", MatchKind::OpenBid, MatchStatus::Pending, None);
        assert!(sub.apply(FeedEvent::insert(r.clone())));
        assert!(!sub.apply(FeedEvent::insert(r.clone())));
        assert!(!sub.apply(FeedEvent::update(r)));
        assert_eq!(sub.records().len(), 1);
    }

    #[test]
    fn out_of_order_terminal_snapshot_wins() {
        let _ = env_logger::try_init();
        let (mut sub, _timers) = subscriber();
        let expires = Some(Utc::now() + Duration::seconds(30));
        // The Accepted update overtakes the original Invited insert on the wire.
        let accepted = record("m1", MatchKind::Invite, MatchStatus::Accepted, expires);
        let invited = record("m1", MatchKind::Invite, MatchStatus::Invited, expires);
        assert!(sub.apply(FeedEvent::update(accepted)));
        assert!(!sub.apply(FeedEvent::insert(invited)));
        assert_eq!(sub.records().get(&MatchId::from_str("m1").unwrap()).unwrap().status, MatchStatus::Accepted);
    }

    #[test]
    fn events_outside_scope_are_ignored() {
        let _ = env_logger::try_init();
        let (mut sub, _timers) = subscriber();
        let mut r = record("m1", MatchKind::OpenBid, MatchStatus::Pending, None);
        r.order_id = OrderId::from_str("o2").unwrap();
        assert!(!sub.apply(FeedEvent::insert(r)));
        assert!(sub.records().is_empty());
    }

    #[test]
    fn invalid_records_never_enter_the_set() {
        let _ = env_logger::try_init();
        let (mut sub, _timers) = subscriber();
        // Invite without an expiry timestamp.
        let r = record("m1", MatchKind::Invite, MatchStatus::Invited, None);
        assert!(!sub.apply(FeedEvent::insert(r)));
        assert!(sub.records().is_empty());
    }

    #[test]
    fn timers_track_invite_status() {
        let _ = env_logger::try_init();
        let (mut sub, timers) = subscriber();
        let expires = Some(Utc::now() + Duration::seconds(30));
        let invited = record("m1", MatchKind::Invite, MatchStatus::Invited, expires);
        sub.apply(FeedEvent::insert(invited));
        assert!(timers.is_registered(&MatchId::from_str("m1").unwrap()));

        // Rider accepted before the countdown ran out; the timer must go immediately.
        let accepted = record("m1", MatchKind::Invite, MatchStatus::Accepted, expires);
        sub.apply(FeedEvent::update(accepted));
        assert!(!timers.is_registered(&MatchId::from_str("m1").unwrap()));
    }

    #[tokio::test]
    async fn teardown_cancels_timers_and_pump() {
        let _ = env_logger::try_init();
        let clock = ManualClock::new(Utc::now());
        let (timers, mut fired_rx) = InviteTimerRegistry::new(Arc::new(clock.clone()), 8);
        let scope = FeedScope::Order(OrderId::from_str("o1").unwrap());
        let (subscriber, _records_rx) = ChangeFeedSubscriber::new(scope, timers.clone());

        let (tx, rx) = mpsc::channel(8);
        let handle = subscriber.spawn(rx);
        let expires = Some(clock.now() + Duration::seconds(10));
        tx.send(FeedEvent::insert(record("m1", MatchKind::Invite, MatchStatus::Invited, expires)))
            .await
            .unwrap();
        tokio::task::yield_now().await;

        handle.close();
        assert!(timers.is_empty(), "teardown must cancel all registered timers");

        clock.advance(Duration::seconds(60));
        assert_eq!(timers.fire_due().await, 0, "no timer may fire after teardown");
        assert!(fired_rx.try_recv().is_err());
    }
}
