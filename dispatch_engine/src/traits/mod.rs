//! # Backend contracts.
//!
//! This module defines the interface contract between the dispatch engine and the managed
//! matching *backend*. The backend owns persistence and all transactional mutation; in
//! particular, the exclusivity invariant (at most one `Accepted` match record per order) is
//! enforced by the backend's accept operation, never by this client.
//!
//! The engine treats the backend as an opaque set of RPC operations:
//!
//! * [`MatchingBackend`] defines the mutation and query operations.
//! * The effect of every mutation is observed back through the change feed (see
//!   [`crate::feed`]), never through the call's return value, so there is a single source of
//!   truth for local state.
mod data_objects;
mod matching_backend;

pub use data_objects::{AcceptOutcome, Ack, BroadcastAck, InviteResponse, RespondOutcome};
pub use matching_backend::{MatchingBackend, MatchingError};
