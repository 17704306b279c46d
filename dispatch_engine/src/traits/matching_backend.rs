use okd_common::Kobo;
use thiserror::Error;

use crate::{
    match_types::{MatchRecord, NewBid, NewInvite, OrderId, RiderId},
    traits::{Ack, BroadcastAck, InviteResponse},
};

/// The remote mutation and query operations the dispatch engine is built on.
///
/// Every operation is a single RPC. Implementations must honour these contracts:
///
/// * All mutations are observed back through the change feed; return values exist only to carry
///   acks and typed failures.
/// * `accept_bid` and an accepting `respond_to_invite` are the transactional serialization
///   points for exclusivity: exactly one record per order ever reaches `Accepted`, every other
///   record for the order goes terminal, and the order moves to `Assigned`, all atomically.
/// * `mark_expired` is idempotent and safe to call redundantly from multiple clients.
#[allow(async_fn_in_trait)]
pub trait MatchingBackend: Clone {
    /// Submit an open bid on an order. Fails with [`MatchingError::Conflict`] if the order is
    /// already assigned.
    async fn submit_bid(&self, bid: NewBid) -> Result<MatchRecord, MatchingError>;

    /// Send a direct, time-boxed invite to a rider. The server computes `expires_at` from its
    /// own clock.
    async fn send_invite(&self, invite: NewInvite) -> Result<Ack, MatchingError>;

    /// Respond to a direct invite. Fails with [`MatchingError::Stale`] if the invite already
    /// expired server-side; the client must re-fetch rather than assume success.
    async fn respond_to_invite(
        &self,
        order_id: &OrderId,
        rider_id: &RiderId,
        response: InviteResponse,
    ) -> Result<Ack, MatchingError>;

    /// Accept a rider's open bid. Fails with [`MatchingError::Conflict`] if another record has
    /// already been accepted for the order.
    async fn accept_bid(&self, order_id: &OrderId, rider_id: &RiderId) -> Result<Ack, MatchingError>;

    /// Confirm expiry of any overdue invites for the order. Idempotent.
    async fn mark_expired(&self, order_id: &OrderId) -> Result<(), MatchingError>;

    /// Create up to `fanout` fresh invites for nearby eligible riders. Riders already holding a
    /// non-terminal record for the order are excluded. Each invite gets an independent TTL
    /// starting at invocation time.
    async fn broadcast(&self, order_id: &OrderId, amount: Kobo, fanout: usize) -> Result<BroadcastAck, MatchingError>;

    /// Fetch the rider's current invite projections, used to seed the rider job feed.
    async fn list_rider_invites(&self, rider_id: &RiderId) -> Result<Vec<MatchRecord>, MatchingError>;
}

#[derive(Debug, Clone, Error)]
pub enum MatchingError {
    /// Exclusivity was lost: the order is already assigned to another rider.
    #[error("Order already assigned: {0}")]
    Conflict(String),
    /// The invite being responded to already expired server-side.
    #[error("Invite is stale: {0}")]
    Stale(String),
    /// The call never reached the server, or the response was lost.
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("No invite exists for rider {rider_id} on order {order_id}")]
    InviteNotFound { order_id: OrderId, rider_id: RiderId },
    #[error("Backend error: {0}")]
    BackendError(String),
}
