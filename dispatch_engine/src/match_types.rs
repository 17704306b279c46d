use std::{
    collections::HashMap,
    fmt::Display,
    str::FromStr,
};

use chrono::{DateTime, Duration, Utc};
use log::*;
use okd_common::Kobo;
use serde::{Deserialize, Serialize};
use thiserror::Error;

//--------------------------------------      OrderId       ----------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl FromStr for OrderId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl OrderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------      RiderId       ----------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RiderId(pub String);

impl FromStr for RiderId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for RiderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for RiderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RiderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------      MatchId       ----------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchId(pub String);

impl FromStr for MatchId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for MatchId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for MatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------   OrderStatusType   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatusType {
    /// The order is waiting for a rider to be assigned.
    Open,
    /// Exactly one match record for the order reached `Accepted`.
    Assigned,
    /// The assigned rider has collected the order.
    PickedUp,
    /// The order has been delivered.
    Delivered,
    /// The order has been cancelled by the customer or the restaurant.
    Cancelled,
}

impl Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatusType::Open => write!(f, "Open"),
            OrderStatusType::Assigned => write!(f, "Assigned"),
            OrderStatusType::PickedUp => write!(f, "PickedUp"),
            OrderStatusType::Delivered => write!(f, "Delivered"),
            OrderStatusType::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid status: {0}")]
pub struct ConversionError(String);

impl FromStr for OrderStatusType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Open" => Ok(Self::Open),
            "Assigned" => Ok(Self::Assigned),
            "PickedUp" => Ok(Self::PickedUp),
            "Delivered" => Ok(Self::Delivered),
            "Cancelled" => Ok(Self::Cancelled),
            s => Err(ConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

//--------------------------------------       Order        ----------------------------------------------------------
/// A delivery job needing a rider. Owned by the order-processing subsystem; the dispatch engine
/// only reads it and reacts to the `Open` → `Assigned` transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub status: OrderStatusType,
    pub delivery_fee: Kobo,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------       Rider        ----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleType {
    Motorcycle,
    Bicycle,
    Car,
    Van,
}

impl Display for VehicleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VehicleType::Motorcycle => write!(f, "Motorcycle"),
            VehicleType::Bicycle => write!(f, "Bicycle"),
            VehicleType::Car => write!(f, "Car"),
            VehicleType::Van => write!(f, "Van"),
        }
    }
}

/// Read-only rider reference data, used for display and ranking only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rider {
    pub rider_id: RiderId,
    pub online: bool,
    pub vehicle: VehicleType,
    pub rating: f32,
    pub completed_jobs: u32,
}

//--------------------------------------     MatchKind      ----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchKind {
    /// A rider-initiated, non-expiring offer to take an order.
    OpenBid,
    /// A restaurant-initiated, time-boxed offer to a specific rider.
    Invite,
}

impl Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchKind::OpenBid => write!(f, "OpenBid"),
            MatchKind::Invite => write!(f, "Invite"),
        }
    }
}

impl FromStr for MatchKind {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OpenBid" => Ok(Self::OpenBid),
            "Invite" => Ok(Self::Invite),
            s => Err(ConversionError(format!("Invalid match kind: {s}"))),
        }
    }
}

//--------------------------------------    MatchStatus     ----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStatus {
    /// An open bid awaiting a restaurant decision.
    Pending,
    /// A direct invite awaiting the rider's response before its TTL elapses.
    Invited,
    /// The record won the order. At most one record per order ever reaches this status.
    Accepted,
    /// The record lost: rider declined, or exclusivity was won by another record.
    Rejected,
    /// The invite's TTL elapsed without a response.
    Expired,
}

impl MatchStatus {
    /// `Accepted`, `Rejected` and `Expired` are terminal; no further transition is ever valid.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchStatus::Accepted | MatchStatus::Rejected | MatchStatus::Expired)
    }
}

impl Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchStatus::Pending => write!(f, "Pending"),
            MatchStatus::Invited => write!(f, "Invited"),
            MatchStatus::Accepted => write!(f, "Accepted"),
            MatchStatus::Rejected => write!(f, "Rejected"),
            MatchStatus::Expired => write!(f, "Expired"),
        }
    }
}

impl FromStr for MatchStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Invited" => Ok(Self::Invited),
            "Accepted" => Ok(Self::Accepted),
            "Rejected" => Ok(Self::Rejected),
            "Expired" => Ok(Self::Expired),
            s => Err(ConversionError(format!("Invalid match status: {s}"))),
        }
    }
}

//--------------------------------------    MatchRecord     ----------------------------------------------------------
#[derive(Debug, Clone, Error)]
pub enum MatchRecordError {
    #[error("Open bid {0} carries invite-only status {1}")]
    BidWithInviteStatus(MatchId, MatchStatus),
    #[error("Invite {0} carries bid-only status {1}")]
    InviteWithBidStatus(MatchId, MatchStatus),
    #[error("Invite {0} has no expiry timestamp")]
    MissingExpiry(MatchId),
    #[error("Open bid {0} has an expiry timestamp")]
    UnexpectedExpiry(MatchId),
}

/// The result of applying a status transition to a match record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// The record moved forward to the new status.
    Applied,
    /// The record was already terminal. Redelivered events land here; never an error.
    NoOp,
    /// The transition is not legal from the current status and was dropped.
    Ignored,
}

/// A single bid or invite linking an order to a rider.
///
/// Records only ever move forward through the state machine:
///
/// ```text
/// Pending --(restaurant accepts)-----> Accepted
/// Pending --(assigned elsewhere)-----> Rejected
/// Invited --(rider accepts)----------> Accepted
/// Invited --(rider rejects)----------> Rejected
/// Invited --(TTL elapses)------------> Expired
/// ```
///
/// `expires_at` is immutable once set, and a record never re-enters `Invited`. Re-invitation
/// creates a brand-new record with a fresh id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub order_id: OrderId,
    pub rider_id: RiderId,
    pub kind: MatchKind,
    pub status: MatchStatus,
    pub amount: Kobo,
    pub created_at: DateTime<Utc>,
    /// Absolute expiry timestamp on the server clock. Present if and only if `kind` is `Invite`.
    pub expires_at: Option<DateTime<Utc>>,
}

impl MatchRecord {
    /// Check the kind/status/expiry invariants. Records arriving over the wire are validated
    /// before entering the local match set.
    pub fn validate(&self) -> Result<(), MatchRecordError> {
        match self.kind {
            MatchKind::OpenBid => {
                if self.status == MatchStatus::Invited || self.status == MatchStatus::Expired {
                    return Err(MatchRecordError::BidWithInviteStatus(self.id.clone(), self.status));
                }
                if self.expires_at.is_some() {
                    return Err(MatchRecordError::UnexpectedExpiry(self.id.clone()));
                }
            },
            MatchKind::Invite => {
                if self.status == MatchStatus::Pending {
                    return Err(MatchRecordError::InviteWithBidStatus(self.id.clone(), self.status));
                }
                if self.expires_at.is_none() {
                    return Err(MatchRecordError::MissingExpiry(self.id.clone()));
                }
            },
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the state machine permits moving from the current status to `next`.
    pub fn can_transition_to(&self, next: MatchStatus) -> bool {
        use MatchStatus::*;
        matches!(
            (self.status, next),
            (Pending, Accepted) | (Pending, Rejected) | (Invited, Accepted) | (Invited, Rejected) | (Invited, Expired)
        )
    }

    /// Apply a status transition in place. Terminal records absorb any further transition as a
    /// [`TransitionResult::NoOp`] so that redelivered feed events are harmless.
    pub fn apply_status(&mut self, next: MatchStatus) -> TransitionResult {
        if self.status == next {
            return TransitionResult::NoOp;
        }
        if self.is_terminal() {
            return TransitionResult::NoOp;
        }
        if !self.can_transition_to(next) {
            return TransitionResult::Ignored;
        }
        self.status = next;
        TransitionResult::Applied
    }

    /// Seconds until the invite expires according to `now`, clamped to zero. `None` for bids.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at.map(|t| (t - now).num_seconds().max(0))
    }
}

//--------------------------------------      NewBid        ----------------------------------------------------------
/// Payload for a rider submitting an open bid on an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBid {
    pub order_id: OrderId,
    pub rider_id: RiderId,
    /// The fee the rider proposes to deliver for.
    pub amount: Kobo,
}

impl NewBid {
    pub fn new(order_id: OrderId, rider_id: RiderId, amount: Kobo) -> Self {
        Self { order_id, rider_id, amount }
    }
}

//--------------------------------------     NewInvite      ----------------------------------------------------------
/// Payload for a restaurant sending a direct, time-boxed invite to a rider. The server computes
/// the absolute `expires_at` from its own clock and the requested TTL.
#[derive(Debug, Clone)]
pub struct NewInvite {
    pub order_id: OrderId,
    pub rider_id: RiderId,
    pub amount: Kobo,
    pub ttl: Duration,
}

impl NewInvite {
    pub fn new(order_id: OrderId, rider_id: RiderId, amount: Kobo, ttl: Duration) -> Self {
        Self { order_id, rider_id, amount, ttl }
    }
}

//--------------------------------------      MatchSet      ----------------------------------------------------------
/// The outcome of folding a feed event into a [`MatchSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The event carried no new information (stale snapshot, backward move, or duplicate).
    Ignored,
}

/// The local, feed-authoritative set of match records for one screen's scope.
///
/// This is the only mutable shared state in the subsystem. It is owned by exactly one
/// change-feed subscriber and only ever mutated by applying feed events. Upserts are
/// last-write-wins by record id, constrained to forward-only state transitions, so applying an
/// older snapshot of a record is always safe to ignore.
#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    records: HashMap<MatchId, MatchRecord>,
}

impl MatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &MatchId) -> Option<&MatchRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatchRecord> {
        self.records.values()
    }

    /// Fold a record snapshot into the set, last-write-wins by id.
    pub fn upsert(&mut self, record: MatchRecord) -> UpsertOutcome {
        match self.records.get_mut(&record.id) {
            None => {
                self.records.insert(record.id.clone(), record);
                UpsertOutcome::Inserted
            },
            Some(existing) => {
                if existing.status == record.status {
                    return UpsertOutcome::Ignored;
                }
                match existing.apply_status(record.status) {
                    TransitionResult::Applied => UpsertOutcome::Updated,
                    TransitionResult::NoOp | TransitionResult::Ignored => {
                        debug!(
                            "📡️ Dropping stale snapshot of match {}: {} does not follow {}",
                            record.id, record.status, existing.status
                        );
                        UpsertOutcome::Ignored
                    },
                }
            },
        }
    }

    /// Apply a status change to an already-held record, honouring the state machine.
    pub fn apply_status(&mut self, id: &MatchId, next: MatchStatus) -> TransitionResult {
        match self.records.get_mut(id) {
            Some(record) => record.apply_status(next),
            None => TransitionResult::Ignored,
        }
    }

    pub fn for_order<'a>(&'a self, order_id: &'a OrderId) -> impl Iterator<Item = &'a MatchRecord> {
        self.records.values().filter(move |r| &r.order_id == order_id)
    }

    pub fn for_rider<'a>(&'a self, rider_id: &'a RiderId) -> impl Iterator<Item = &'a MatchRecord> {
        self.records.values().filter(move |r| &r.rider_id == rider_id)
    }

    /// Whether any record for the order has reached `Accepted`.
    pub fn has_accepted(&self, order_id: &OrderId) -> bool {
        self.for_order(order_id).any(|r| r.status == MatchStatus::Accepted)
    }

    /// All non-terminal records for the order (pending bids and live invites).
    pub fn outstanding_for_order<'a>(&'a self, order_id: &'a OrderId) -> impl Iterator<Item = &'a MatchRecord> {
        self.for_order(order_id).filter(|r| !r.is_terminal())
    }

    /// Riders who currently hold a non-terminal record for the order. These riders are excluded
    /// from broadcast fan-out and from the "available" list in the restaurant selector.
    pub fn excluded_riders(&self, order_id: &OrderId) -> Vec<RiderId> {
        let mut riders: Vec<RiderId> =
            self.outstanding_for_order(order_id).map(|r| r.rider_id.clone()).collect();
        riders.sort();
        riders.dedup();
        riders
    }
}
