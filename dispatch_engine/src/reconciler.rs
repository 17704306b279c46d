use log::*;
use tokio::sync::{mpsc, watch};

use crate::{
    escalation::{EscalationDecision, EscalationOffer, EscalationPolicy},
    gateway::MatchingGateway,
    match_types::{MatchSet, MatchStatus},
    timers::ExpiryFired,
    traits::{MatchingBackend, MatchingError},
};

/// Reacts to a local countdown reaching zero.
///
/// The reconciler never assumes the server still considers the invite live: a concurrent accept
/// may already have landed. It re-checks the freshest local record first and is a silent no-op
/// when the record is gone or already terminal; that race is benign, not a failure. Otherwise it
/// confirms the expiry with the server (`mark_expired`, idempotent and retried) and then asks
/// the escalation policy whether a broadcast should be offered.
pub struct ExpiryReconciler<B> {
    gateway: MatchingGateway<B>,
    records: watch::Receiver<MatchSet>,
    policy: EscalationPolicy,
}

impl<B> ExpiryReconciler<B>
where B: MatchingBackend
{
    pub fn new(gateway: MatchingGateway<B>, records: watch::Receiver<MatchSet>, policy: EscalationPolicy) -> Self {
        Self { gateway, records, policy }
    }

    /// Handle one local expiry. Returns the broadcast offer to surface to the caller, if the
    /// policy grants one.
    pub async fn handle(&mut self, fired: ExpiryFired) -> Result<Option<EscalationOffer>, MatchingError> {
        let snapshot = self.records.borrow().clone();
        let record = match snapshot.get(&fired.match_id) {
            Some(record) => record.clone(),
            None => {
                debug!(
                    "🕰️ Timer fired for match {} which is no longer in the set; ignoring",
                    fired.match_id
                );
                return Ok(None);
            },
        };
        if record.is_terminal() {
            debug!(
                "🕰️ Match {} already went {} before its countdown fired; nothing to reconcile",
                record.id, record.status
            );
            return Ok(None);
        }

        self.gateway.mark_expired(&fired.order_id).await?;
        info!("🕰️ Confirmed expiry of invite {} on order {}", fired.match_id, fired.order_id);

        // Decide against the post-expiry view without waiting for the feed to confirm it.
        let mut projected = snapshot;
        projected.apply_status(&fired.match_id, MatchStatus::Expired);
        match self.policy.decide(&projected, &fired.order_id) {
            EscalationDecision::Offer { fanout } => Ok(Some(EscalationOffer {
                order_id: fired.order_id,
                fanout,
                suggested_amount: record.amount,
            })),
            EscalationDecision::Hold => Ok(None),
        }
    }

    /// Consume the expiry stream until it closes, forwarding broadcast offers to `offers`.
    pub async fn run(mut self, mut fired_rx: mpsc::Receiver<ExpiryFired>, offers: mpsc::Sender<EscalationOffer>) {
        debug!("🕰️ Expiry reconciler started");
        while let Some(fired) = fired_rx.recv().await {
            match self.handle(fired).await {
                Ok(Some(offer)) => {
                    if offers.send(offer).await.is_err() {
                        debug!("🕰️ Offer listener has gone away; stopping reconciler");
                        return;
                    }
                },
                Ok(None) => {},
                Err(e) => {
                    error!("🕰️ Failed to reconcile a local expiry: {e}");
                },
            }
        }
        debug!("🕰️ Expiry stream closed; reconciler stopping");
    }
}
