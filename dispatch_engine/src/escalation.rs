use log::*;
use okd_common::Kobo;

use crate::{
    config::MatchingConfig,
    match_types::{MatchSet, OrderId},
};

/// Whether a broadcast should be offered for an order right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationDecision {
    /// The last outstanding record went terminal with no acceptance; offer a fan-out.
    Offer { fanout: usize },
    /// Something is still in flight (or the order is already won); sit tight.
    Hold,
}

/// A concrete broadcast offer surfaced to the caller after an expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationOffer {
    pub order_id: OrderId,
    pub fanout: usize,
    /// The amount carried over from the record whose expiry triggered the offer.
    pub suggested_amount: Kobo,
}

/// Decides, when an invite expires, whether to offer broadcasting to additional riders.
///
/// A broadcast is only offered once the *last* outstanding bid or invite for the order has gone
/// terminal without producing an acceptance. Riders already holding a non-terminal record are
/// excluded from the fan-out (enforced server-side; mirrored locally for the selector view), and
/// the server stamps every broadcast invite with an independent TTL starting at invocation time,
/// never inherited from the expired invite.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    fanout: usize,
}

impl EscalationPolicy {
    pub fn new(fanout: usize) -> Self {
        Self { fanout }
    }

    pub fn from_config(config: &MatchingConfig) -> Self {
        Self::new(config.broadcast_fanout)
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Evaluate the order's records. Call sites that have just observed a local expiry should
    /// pass a set in which that record is already terminal (the reconciler pre-applies it).
    pub fn decide(&self, records: &MatchSet, order_id: &OrderId) -> EscalationDecision {
        if records.for_order(order_id).next().is_none() {
            trace!("📣️ No match history for order {order_id}; nothing to escalate");
            return EscalationDecision::Hold;
        }
        if records.has_accepted(order_id) {
            trace!("📣️ Order {order_id} already has an accepted match; no escalation");
            return EscalationDecision::Hold;
        }
        let outstanding = records.outstanding_for_order(order_id).count();
        if outstanding > 0 {
            trace!("📣️ Order {order_id} still has {outstanding} outstanding matches; holding");
            return EscalationDecision::Hold;
        }
        debug!("📣️ All matches for order {order_id} are terminal with no acceptance; offering broadcast");
        EscalationDecision::Offer { fanout: self.fanout }
    }
}
