//! # Change feed consumption.
//!
//! The backend pushes a stream of match-record insert/update events, filtered by order (the
//! restaurant view) or by rider (the rider view). Delivery is at-least-once and may reorder, so
//! the subscriber deduplicates by `(record id, status)` and folds events into the local
//! [`crate::match_types::MatchSet`] last-write-wins, constrained to forward-only state
//! transitions.
//!
//! Subscriptions are explicit: [`ChangeFeedSubscriber::spawn`] returns a
//! [`SubscriptionHandle`] whose drop tears down the pump task and cancels every timer that was
//! registered through it, on all exit paths.
mod events;
mod subscriber;

pub use events::{FeedEvent, FeedEventType, FeedScope};
pub use subscriber::{ChangeFeedSubscriber, SubscriptionHandle};
