use std::fmt::Debug;

use log::*;
use okd_common::Kobo;

use crate::{
    config::RetryPolicy,
    match_types::{MatchRecord, NewBid, NewInvite, OrderId, RiderId},
    traits::{AcceptOutcome, Ack, BroadcastAck, InviteResponse, MatchingBackend, MatchingError, RespondOutcome},
};

/// `MatchingGateway` is the single path for requesting match-record mutations from the backend.
///
/// The gateway never writes to the local match set. Every mutation's effect is observed back
/// through the change feed, so a stale in-flight call completing after the owning screen has
/// been torn down is harmless.
///
/// Retry policy: only the idempotent operations (`mark_expired`, `broadcast`) are retried on
/// transport failure. `respond_to_invite` and `accept_bid` surface transport failures to the
/// caller, since silently retrying them would create double-submission ambiguity.
pub struct MatchingGateway<B> {
    backend: B,
    retry: RetryPolicy,
}

impl<B> Debug for MatchingGateway<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MatchingGateway")
    }
}

impl<B> MatchingGateway<B> {
    pub fn new(backend: B, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B> MatchingGateway<B>
where B: MatchingBackend
{
    /// Submit an open bid on behalf of a rider.
    ///
    /// Conflict (the order is already assigned) is surfaced as an error here, because the bid
    /// form should not have been reachable in that state; the caller refreshes on failure.
    pub async fn submit_bid(&self, bid: NewBid) -> Result<MatchRecord, MatchingError> {
        trace!("🏍️ Submitting bid of {} by rider {} on order {}", bid.amount, bid.rider_id, bid.order_id);
        let record = self.backend.submit_bid(bid).await?;
        debug!("🏍️ Bid {} created for order {}", record.id, record.order_id);
        Ok(record)
    }

    /// Send a direct, time-boxed invite to a rider. The ack carries the server-computed clock
    /// reading used to keep countdowns honest.
    pub async fn send_invite(&self, invite: NewInvite) -> Result<Ack, MatchingError> {
        trace!(
            "🏍️ Inviting rider {} to order {} for {} (ttl {}s)",
            invite.rider_id,
            invite.order_id,
            invite.amount,
            invite.ttl.num_seconds()
        );
        let ack = self.backend.send_invite(invite).await?;
        Ok(ack)
    }

    /// Respond to an invite on behalf of a rider. A server-side `Stale` result is a distinct
    /// outcome, not an error: the invite expired before the response landed and the caller must
    /// re-fetch before acting further on the order.
    pub async fn respond_to_invite(
        &self,
        order_id: &OrderId,
        rider_id: &RiderId,
        response: InviteResponse,
    ) -> Result<RespondOutcome, MatchingError> {
        match self.backend.respond_to_invite(order_id, rider_id, response).await {
            Ok(_) => {
                debug!("🏍️ Rider {rider_id} responded {response:?} to invite on order {order_id}");
                Ok(RespondOutcome::Acknowledged)
            },
            Err(MatchingError::Stale(msg)) => {
                debug!("🏍️ Invite for rider {rider_id} on order {order_id} was already stale: {msg}");
                Ok(RespondOutcome::StaleInvite)
            },
            Err(e) => Err(e),
        }
    }

    /// Accept a rider's open bid. Losing the exclusivity race is a distinct outcome, not an
    /// error: some other record was accepted first and the local set will catch up via the feed.
    pub async fn accept_bid(&self, order_id: &OrderId, rider_id: &RiderId) -> Result<AcceptOutcome, MatchingError> {
        match self.backend.accept_bid(order_id, rider_id).await {
            Ok(_) => {
                debug!("🏍️ Bid by rider {rider_id} accepted for order {order_id}");
                Ok(AcceptOutcome::Accepted)
            },
            Err(MatchingError::Conflict(msg)) => {
                debug!("🏍️ Lost the accept race on order {order_id}: {msg}");
                Ok(AcceptOutcome::AlreadyAssigned)
            },
            Err(e) => Err(e),
        }
    }

    /// Confirm expiry of overdue invites for the order. Idempotent, so transport failures are
    /// retried with backoff.
    pub async fn mark_expired(&self, order_id: &OrderId) -> Result<(), MatchingError> {
        let mut attempt = 0u32;
        loop {
            match self.backend.mark_expired(order_id).await {
                Err(MatchingError::Transport(msg)) if attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    warn!("🏍️ mark_expired for order {order_id} failed ({msg}); retry {attempt} in {delay:?}");
                    tokio::time::sleep(delay).await;
                },
                other => return other,
            }
        }
    }

    /// Fan out fresh invites to up to `fanout` eligible riders. Idempotent on the server side
    /// (re-broadcasting never re-invites a rider who already holds a non-terminal record), so
    /// transport failures are retried with backoff.
    pub async fn broadcast(
        &self,
        order_id: &OrderId,
        amount: Kobo,
        fanout: usize,
    ) -> Result<BroadcastAck, MatchingError> {
        let mut attempt = 0u32;
        loop {
            match self.backend.broadcast(order_id, amount, fanout).await {
                Ok(ack) => {
                    info!("🏍️ Broadcast on order {order_id} invited {} riders", ack.invited);
                    return Ok(ack);
                },
                Err(MatchingError::Transport(msg)) if attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    warn!("🏍️ broadcast for order {order_id} failed ({msg}); retry {attempt} in {delay:?}");
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch the rider's current invites, used to seed a rider job feed before live events flow.
    pub async fn list_rider_invites(&self, rider_id: &RiderId) -> Result<Vec<MatchRecord>, MatchingError> {
        self.backend.list_rider_invites(rider_id).await
    }
}
