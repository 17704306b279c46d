use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Acknowledgement of a backend mutation. Carries the server's clock so callers can fold the
/// observed offset into their [`crate::clock::SystemClock`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub server_now: DateTime<Utc>,
    pub message: Option<String>,
}

impl Ack {
    pub fn at(server_now: DateTime<Utc>) -> Self {
        Self { server_now, message: None }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Acknowledgement of a broadcast, reporting how many fresh invites were actually created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastAck {
    pub server_now: DateTime<Utc>,
    pub invited: usize,
}

/// A rider's response to a direct invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InviteResponse {
    Accept,
    Reject,
}

/// Outcome of trying to accept a bid, with the exclusivity race loss as a distinct non-error
/// result. The UI refreshes state on `AlreadyAssigned` rather than retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted,
    AlreadyAssigned,
}

/// Outcome of responding to an invite. `StaleInvite` means the invite already expired
/// server-side; the caller must re-fetch before acting further on the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespondOutcome {
    Acknowledged,
    StaleInvite,
}
