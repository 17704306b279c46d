use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use log::*;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    clock::Clock,
    match_types::{MatchId, MatchRecord, MatchStatus, OrderId},
};

/// Emitted when an invite's countdown reaches zero. Each registered invite fires at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryFired {
    pub match_id: MatchId,
    pub order_id: OrderId,
}

struct Deadline {
    order_id: OrderId,
    expires_at: DateTime<Utc>,
}

/// One countdown per live invite, keyed by record id in a single registry.
///
/// Countdowns are recomputed from the absolute `expires_at` on every scan rather than decremented,
/// so suspension and clock skew cannot drift them. Cancellation is unconditional and idempotent;
/// the feed cancels a timer the moment its record leaves `Invited`, even mid-countdown. Keeping
/// every timer in this one registry (rather than scattered across UI components) is what makes
/// "no timer outlives its record" enforceable on teardown.
#[derive(Clone)]
pub struct InviteTimerRegistry {
    clock: Arc<dyn Clock>,
    deadlines: Arc<Mutex<HashMap<MatchId, Deadline>>>,
    fired_tx: mpsc::Sender<ExpiryFired>,
}

impl InviteTimerRegistry {
    pub fn new(clock: Arc<dyn Clock>, buffer_size: usize) -> (Self, mpsc::Receiver<ExpiryFired>) {
        let (fired_tx, fired_rx) = mpsc::channel(buffer_size);
        let registry = Self { clock, deadlines: Arc::new(Mutex::new(HashMap::new())), fired_tx };
        (registry, fired_rx)
    }

    /// Register a countdown for the record. Anything other than a live invite is ignored.
    pub fn register(&self, record: &MatchRecord) {
        if record.status != MatchStatus::Invited {
            return;
        }
        let Some(expires_at) = record.expires_at else {
            warn!("⏱️ Invite {} has no expiry timestamp; not registering a timer", record.id);
            return;
        };
        let mut deadlines = self.lock();
        deadlines.insert(record.id.clone(), Deadline { order_id: record.order_id.clone(), expires_at });
        trace!("⏱️ Timer registered for invite {} on order {}", record.id, record.order_id);
    }

    /// Cancel the countdown for the record, if one exists. Idempotent.
    pub fn cancel(&self, id: &MatchId) {
        if self.lock().remove(id).is_some() {
            trace!("⏱️ Timer for invite {id} cancelled");
        }
    }

    /// Cancel every countdown. Called on subscription teardown.
    pub fn cancel_all(&self) {
        let mut deadlines = self.lock();
        if !deadlines.is_empty() {
            debug!("⏱️ Cancelling all {} timers", deadlines.len());
        }
        deadlines.clear();
    }

    pub fn is_registered(&self, id: &MatchId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Seconds until the invite expires, clamped to zero. `None` if no timer is registered.
    pub fn remaining_secs(&self, id: &MatchId) -> Option<i64> {
        let now = self.clock.now();
        self.lock().get(id).map(|d| (d.expires_at - now).num_seconds().max(0))
    }

    /// Fire every countdown that has reached zero, exactly once each, and remove it. Returns the
    /// number of expiries dispatched.
    pub async fn fire_due(&self) -> usize {
        let now = self.clock.now();
        let due: Vec<ExpiryFired> = {
            let mut deadlines = self.lock();
            let ids: Vec<MatchId> = deadlines
                .iter()
                .filter(|(_, d)| d.expires_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| {
                    deadlines
                        .remove(&id)
                        .map(|d| ExpiryFired { match_id: id, order_id: d.order_id })
                })
                .collect()
        };
        let count = due.len();
        for fired in due {
            debug!("⏱️ Invite {} on order {} expired locally", fired.match_id, fired.order_id);
            if self.fired_tx.send(fired).await.is_err() {
                debug!("⏱️ Expiry listener has gone away; dropping expiry event");
            }
        }
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<MatchId, Deadline>> {
        self.deadlines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Starts the countdown scan worker. Do not await the returned JoinHandle, as it will run until
/// aborted by the owning subscription handle.
pub fn start_timer_worker(registry: InviteTimerRegistry, tick: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(tick);
        debug!("⏱️ Invite countdown worker started");
        loop {
            timer.tick().await;
            let fired = registry.fire_due().await;
            if fired > 0 {
                debug!("⏱️ {fired} invites expired this tick");
            }
        }
    })
}
