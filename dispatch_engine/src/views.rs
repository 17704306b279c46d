use chrono::{DateTime, Utc};

use crate::{
    escalation::{EscalationDecision, EscalationPolicy},
    match_types::{MatchKind, MatchRecord, MatchSet, MatchStatus, OrderId, Rider, RiderId},
};

/// A live invite together with its countdown, recomputed from the absolute expiry on every
/// projection. Counters are derived, never stateful.
#[derive(Debug, Clone, PartialEq)]
pub struct InviteEntry {
    pub record: MatchRecord,
    pub remaining_secs: i64,
}

/// The restaurant-side rider selector, projected from one order's match records.
///
/// A pure function of its inputs; recomputed on every match-set change and every countdown tick.
#[derive(Debug, Clone, Default)]
pub struct RestaurantSelection {
    /// Riders who bid on the order, cheapest first.
    pub interested: Vec<MatchRecord>,
    /// Direct invites still counting down, soonest expiry first.
    pub pending_invites: Vec<InviteEntry>,
    /// Invites that ran out without a response.
    pub expired: Vec<MatchRecord>,
    /// Riders who could still be invited: the given roster minus anyone already holding a
    /// non-terminal record for the order.
    pub available: Vec<Rider>,
    /// True when every match for the order has gone terminal with no acceptance, i.e. the
    /// escalation policy would offer a broadcast right now.
    pub escalation_available: bool,
}

impl RestaurantSelection {
    pub fn project(
        records: &MatchSet,
        order_id: &OrderId,
        now: DateTime<Utc>,
        roster: &[Rider],
        policy: &EscalationPolicy,
    ) -> Self {
        let mut interested: Vec<MatchRecord> = records
            .for_order(order_id)
            .filter(|r| r.kind == MatchKind::OpenBid && r.status == MatchStatus::Pending)
            .cloned()
            .collect();
        interested.sort_by(|a, b| a.amount.cmp(&b.amount).then(a.created_at.cmp(&b.created_at)));

        let mut pending_invites: Vec<InviteEntry> = records
            .for_order(order_id)
            .filter(|r| r.status == MatchStatus::Invited)
            .map(|r| InviteEntry { remaining_secs: r.remaining_secs(now).unwrap_or(0), record: r.clone() })
            .collect();
        pending_invites.sort_by_key(|e| e.remaining_secs);

        let mut expired: Vec<MatchRecord> = records
            .for_order(order_id)
            .filter(|r| r.status == MatchStatus::Expired)
            .cloned()
            .collect();
        expired.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let excluded = records.excluded_riders(order_id);
        let available: Vec<Rider> =
            roster.iter().filter(|r| !excluded.contains(&r.rider_id)).cloned().collect();

        let escalation_available =
            matches!(policy.decide(records, order_id), EscalationDecision::Offer { .. });

        Self { interested, pending_invites, expired, available, escalation_available }
    }
}

/// The rider-side job feed: the rider's live invites, each with its countdown.
#[derive(Debug, Clone, Default)]
pub struct RiderJobFeed {
    pub invites: Vec<InviteEntry>,
}

impl RiderJobFeed {
    pub fn project(records: &MatchSet, rider_id: &RiderId, now: DateTime<Utc>) -> Self {
        let mut invites: Vec<InviteEntry> = records
            .for_rider(rider_id)
            .filter(|r| r.status == MatchStatus::Invited)
            .map(|r| InviteEntry { remaining_secs: r.remaining_secs(now).unwrap_or(0), record: r.clone() })
            .collect();
        invites.sort_by_key(|e| e.remaining_secs);
        Self { invites }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use chrono::Duration;
    use okd_common::Kobo;

    use super::*;
    use crate::match_types::{MatchId, VehicleType};

    fn rider(id: &str) -> Rider {
        Rider {
            rider_id: RiderId::from_str(id).unwrap(),
            online: true,
            vehicle: VehicleType::Motorcycle,
            rating: 4.5,
            completed_jobs: 120,
        }
    }

    fn record(
        id: &str,
        rider_id: &str,
        kind: MatchKind,
        status: MatchStatus,
        amount: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> MatchRecord {
        MatchRecord {
            id: MatchId::from_str(id).unwrap(),
            order_id: OrderId::from_str("o1").unwrap(),
            rider_id: RiderId::from_str(rider_id).unwrap(),
            kind,
            status,
            amount: Kobo::from_naira(amount),
            created_at: Utc::now(),
            expires_at,
        }
    }

    #[test]
    fn selector_partitions_and_sorts() {
        let now = Utc::now();
        let mut records = MatchSet::new();
        records.upsert(record("m1", "r1", MatchKind::OpenBid, MatchStatus::Pending, 700, None));
        records.upsert(record("m2", "r2", MatchKind::OpenBid, MatchStatus::Pending, 500, None));
        records.upsert(record("m3", "r3", MatchKind::Invite, MatchStatus::Invited, 600, Some(now + Duration::seconds(25))));
        records.upsert(record("m4", "r4", MatchKind::Invite, MatchStatus::Invited, 600, Some(now + Duration::seconds(5))));
        records.upsert(record("m5", "r5", MatchKind::Invite, MatchStatus::Expired, 600, Some(now - Duration::seconds(30))));

        let roster = vec![rider("r1"), rider("r6"), rider("r7")];
        let policy = EscalationPolicy::new(3);
        let order_id = OrderId::from_str("o1").unwrap();
        let view = RestaurantSelection::project(&records, &order_id, now, &roster, &policy);

        // Cheapest bid first.
        assert_eq!(view.interested.len(), 2);
        assert_eq!(view.interested[0].amount, Kobo::from_naira(500));
        // Soonest expiry first, with live countdowns.
        assert_eq!(view.pending_invites.len(), 2);
        assert_eq!(view.pending_invites[0].remaining_secs, 5);
        assert_eq!(view.pending_invites[1].remaining_secs, 25);
        assert_eq!(view.expired.len(), 1);
        // r1 holds a pending bid, so only r6 and r7 remain available.
        let available: Vec<&str> = view.available.iter().map(|r| r.rider_id.as_str()).collect();
        assert_eq!(available, vec!["r6", "r7"]);
        // Bids and invites are still outstanding.
        assert!(!view.escalation_available);
    }

    #[test]
    fn selector_offers_escalation_when_everything_went_terminal() {
        let now = Utc::now();
        let mut records = MatchSet::new();
        records.upsert(record("m1", "r1", MatchKind::Invite, MatchStatus::Expired, 600, Some(now - Duration::seconds(5))));
        records.upsert(record("m2", "r2", MatchKind::OpenBid, MatchStatus::Rejected, 500, None));

        let policy = EscalationPolicy::new(3);
        let order_id = OrderId::from_str("o1").unwrap();
        let view = RestaurantSelection::project(&records, &order_id, now, &[], &policy);
        assert!(view.escalation_available);
    }

    #[test]
    fn job_feed_lists_only_the_riders_live_invites() {
        let now = Utc::now();
        let mut records = MatchSet::new();
        records.upsert(record("m1", "r1", MatchKind::Invite, MatchStatus::Invited, 600, Some(now + Duration::seconds(20))));
        records.upsert(record("m2", "r1", MatchKind::Invite, MatchStatus::Expired, 600, Some(now - Duration::seconds(40))));
        records.upsert(record("m3", "r2", MatchKind::Invite, MatchStatus::Invited, 600, Some(now + Duration::seconds(10))));

        let rider_id = RiderId::from_str("r1").unwrap();
        let feed = RiderJobFeed::project(&records, &rider_id, now);
        assert_eq!(feed.invites.len(), 1);
        assert_eq!(feed.invites[0].record.id, MatchId::from_str("m1").unwrap());
        assert_eq!(feed.invites[0].remaining_secs, 20);
    }
}
