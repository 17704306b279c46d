use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use chrono::{DateTime, Duration, Utc};
use log::*;

/// Source of "server now" for countdown arithmetic.
///
/// Countdowns are always recomputed as `expires_at - clock.now()`, never held as a decrementing
/// counter, so that app suspension and clock skew cannot drift a timer away from the server's
/// view of the deadline.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock adjusted by the last observed offset to the server clock.
#[derive(Clone, Default)]
pub struct SystemClock {
    offset_ms: Arc<AtomicI64>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a server-side timestamp (e.g. from a gateway ack) and fold the implied offset in.
    pub fn observe_server_time(&self, server_now: DateTime<Utc>) {
        let offset = server_now - Utc::now();
        let ms = offset.num_milliseconds();
        self.offset_ms.store(ms, Ordering::Relaxed);
        trace!("🧭️ Server clock offset updated to {ms}ms");
    }

    pub fn offset(&self) -> Duration {
        Duration::milliseconds(self.offset_ms.load(Ordering::Relaxed))
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset()
    }
}
