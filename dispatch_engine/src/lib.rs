//! Okada Dispatch Engine
//!
//! The dispatch engine coordinates the rider assignment protocol for the Okada delivery
//! marketplace: competitive open bids, direct time-boxed invites, automatic expiry and broadcast
//! escalation, with the guarantee that exactly one rider ends up assigned to an order.
//!
//! The library is divided into three main sections:
//! 1. The backend contract ([`mod@traits`]). Persistence and transactional mutation live in a
//!    managed backend; the engine only ever requests mutations through [`MatchingGateway`] and
//!    observes their effects through the change feed. Exclusivity (at most one `Accepted` match
//!    per order) is enforced by the backend's accept operation, which the engine treats as its
//!    serialization point.
//! 2. Local state and timing ([`mod@feed`], [`mod@timers`]). A [`ChangeFeedSubscriber`] owns the
//!    match set for one screen's scope and is its only writer; the [`InviteTimerRegistry`] keeps
//!    one countdown per live invite, recomputed from the absolute server expiry. The
//!    [`ExpiryReconciler`] reacts to countdowns reaching zero and the [`EscalationPolicy`]
//!    decides when to offer a broadcast to additional riders.
//! 3. View projections ([`mod@views`]). Pure functions deriving the restaurant-side rider
//!    selector and the rider-side job feed from the current match set.
pub mod clock;
pub mod config;
pub mod escalation;
pub mod feed;
pub mod match_types;
pub mod timers;
pub mod traits;
pub mod views;

mod gateway;
mod reconciler;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use escalation::{EscalationDecision, EscalationOffer, EscalationPolicy};
pub use feed::{ChangeFeedSubscriber, FeedEvent, FeedEventType, FeedScope, SubscriptionHandle};
pub use gateway::MatchingGateway;
pub use reconciler::ExpiryReconciler;
pub use timers::{start_timer_worker, ExpiryFired, InviteTimerRegistry};
pub use traits::{AcceptOutcome, Ack, BroadcastAck, InviteResponse, MatchingBackend, MatchingError, RespondOutcome};
