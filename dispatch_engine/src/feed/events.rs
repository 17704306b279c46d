use serde::{Deserialize, Serialize};

use crate::match_types::{MatchRecord, OrderId, RiderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedEventType {
    Insert,
    Update,
}

/// One push event from the backend's change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub event: FeedEventType,
    pub record: MatchRecord,
}

impl FeedEvent {
    pub fn insert(record: MatchRecord) -> Self {
        Self { event: FeedEventType::Insert, record }
    }

    pub fn update(record: MatchRecord) -> Self {
        Self { event: FeedEventType::Update, record }
    }
}

/// What slice of the feed a subscriber consumes: one order's records (restaurant side) or one
/// rider's records (rider side).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedScope {
    Order(OrderId),
    Rider(RiderId),
}

impl FeedScope {
    pub fn matches(&self, record: &MatchRecord) -> bool {
        match self {
            FeedScope::Order(order_id) => &record.order_id == order_id,
            FeedScope::Rider(rider_id) => &record.rider_id == rider_id,
        }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use chrono::Utc;
    use okd_common::Kobo;

    use super::*;
    use crate::match_types::{MatchId, MatchKind, MatchStatus};

    #[test]
    fn feed_event_wire_format() {
        let record = MatchRecord {
            id: MatchId::from_str("m1").unwrap(),
            order_id: OrderId::from_str("o1").unwrap(),
            rider_id: RiderId::from_str("r1").unwrap(),
            kind: MatchKind::OpenBid,
            status: MatchStatus::Pending,
            amount: Kobo::from_naira(500),
            created_at: Utc::now(),
            expires_at: None,
        };
        let event = FeedEvent::insert(record);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"insert\""));
        let back: FeedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn scope_filters_by_order_or_rider() {
        let record = MatchRecord {
            id: MatchId::from_str("m1").unwrap(),
            order_id: OrderId::from_str("o1").unwrap(),
            rider_id: RiderId::from_str("r1").unwrap(),
            kind: MatchKind::OpenBid,
            status: MatchStatus::Pending,
            amount: Kobo::from_naira(500),
            created_at: Utc::now(),
            expires_at: None,
        };
        assert!(FeedScope::Order(OrderId::from_str("o1").unwrap()).matches(&record));
        assert!(!FeedScope::Order(OrderId::from_str("o2").unwrap()).matches(&record));
        assert!(FeedScope::Rider(RiderId::from_str("r1").unwrap()).matches(&record));
        assert!(!FeedScope::Rider(RiderId::from_str("r9").unwrap()).matches(&record));
    }
}
