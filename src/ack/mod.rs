//! Acknowledgement tracking
//!
//! Overview
//! --------
//! Holds the in-flight set: receipt tokens handed downstream but not yet
//! deleted from the queue. A token enters on delivery and leaves on a
//! successful delete, on `abandon`, or when it outlives the staleness window
//! (the service will have redelivered it under a new token by then).
//!
//! Pruning only bounds memory. `acknowledge` on a pruned or otherwise
//! untracked token still issues the delete; only tokens remembered as already
//! deleted short-circuit.
//!
//! Concurrency
//! -----------
//! - Deletes run under a semaphore so at most `max_concurrent_deletes` are
//!   outstanding per tracker.
//! - Each token has its own async gate; concurrent `acknowledge` calls for one
//!   delivery issue at most one delete at a time, and later callers observe
//!   the earlier success without a second network call.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::{AckError, BridgeError};
use crate::ingest::{Message, QueueClient};

/// Receipt tokens remembered after a successful delete.
pub const ACKED_MEMORY: usize = 4_096;

type Gate = Arc<AsyncMutex<()>>;

struct Entry {
    message_id: String,
    delivered_at: Instant,
    gate: Gate,
}

#[derive(Default)]
struct AckState {
    in_flight: FxHashMap<String, Entry>,
    /// Gates for tokens acknowledged while not in flight.
    untracked: FxHashMap<String, Gate>,
    acked: FxHashSet<String>,
    acked_order: VecDeque<String>,
}

impl AckState {
    fn remember_acked(&mut self, token: &str) {
        if self.acked.insert(token.to_string()) {
            self.acked_order.push_back(token.to_string());
        }
        while self.acked_order.len() > ACKED_MEMORY {
            if let Some(old) = self.acked_order.pop_front() {
                self.acked.remove(&old);
            }
        }
    }
}

pub struct AckTracker<C> {
    client: Arc<C>,
    state: Mutex<AckState>,
    deletes: Semaphore,
    stale_after: Duration,
    released: Notify,
}

impl<C> AckTracker<C>
where
    C: QueueClient<Error = BridgeError>,
{
    pub fn new(client: Arc<C>, stale_after: Duration, max_concurrent_deletes: usize) -> Self {
        Self {
            client,
            state: Mutex::new(AckState::default()),
            deletes: Semaphore::new(max_concurrent_deletes.max(1)),
            stale_after,
            released: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, AckState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Record a delivery. Re-tracking a token refreshes its delivery time.
    pub fn track(&self, message: &Message) {
        let mut st = self.state();
        let entry = st
            .in_flight
            .entry(message.receipt_token().to_string())
            .or_insert_with(|| Entry {
                message_id: message.id().to_string(),
                delivered_at: Instant::now(),
                gate: Arc::new(AsyncMutex::new(())),
            });
        entry.delivered_at = Instant::now();
    }

    /// Delete the delivery from the queue.
    ///
    /// On failure the token stays in flight and the caller may retry.
    /// Acknowledging a delivery already deleted through this tracker is a
    /// no-op; anything else, including pruned deliveries, is deleted.
    pub async fn acknowledge(&self, message: &Message) -> Result<(), AckError> {
        let token = message.receipt_token();
        let gate = {
            let mut st = self.state();
            if st.acked.contains(token) {
                debug!(msg_id = %message.id(), "acknowledge skipped: already deleted");
                return Ok(());
            }
            match st.in_flight.get(token) {
                Some(e) => e.gate.clone(),
                None => st
                    .untracked
                    .entry(token.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                    .clone(),
            }
        };

        let _serial = gate.lock().await;
        if self.state().acked.contains(token) {
            // A concurrent caller already deleted it.
            return Ok(());
        }

        let _permit = self.deletes.acquire().await.map_err(|e| AckError {
            receipt_token: token.to_string(),
            reason: e.to_string(),
        })?;

        match self.client.delete(token).await {
            Ok(()) => {
                {
                    let mut st = self.state();
                    st.in_flight.remove(token);
                    st.untracked.remove(token);
                    st.remember_acked(token);
                }
                self.released.notify_one();
                debug!(msg_id = %message.id(), "acknowledged");
                Ok(())
            }
            Err(e) => {
                {
                    let mut st = self.state();
                    // Keep the gate while another caller is queued on it.
                    if st.untracked.get(token).is_some_and(|g| Arc::strong_count(g) <= 2) {
                        st.untracked.remove(token);
                    }
                }
                warn!(msg_id = %message.id(), error = %e, "delete failed; message stays in flight");
                Err(AckError {
                    receipt_token: token.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Acknowledge on a separate task so delivery of later messages is not held up.
    pub fn acknowledge_in_background(
        self: &Arc<Self>,
        message: Message,
    ) -> JoinHandle<Result<(), AckError>> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move { tracker.acknowledge(&message).await })
    }

    /// Stop tracking a delivery without deleting it; the service requeues it
    /// once the visibility timeout lapses.
    pub fn abandon(&self, message: &Message) {
        if self.state().in_flight.remove(message.receipt_token()).is_some() {
            debug!(msg_id = %message.id(), "abandoned");
            self.released.notify_one();
        }
    }

    /// Drop deliveries older than the staleness window. Deliveries with a
    /// delete in progress are kept. Returns the number removed.
    pub fn prune_stale(&self) -> usize {
        let now = Instant::now();
        let mut st = self.state();
        let before = st.in_flight.len();
        st.in_flight.retain(|token, e| {
            let fresh = now.duration_since(e.delivered_at) < self.stale_after;
            let busy = e.gate.try_lock().is_err();
            if !fresh && !busy {
                debug!(msg_id = %e.message_id, receipt = %token, "dropping stale delivery");
            }
            fresh || busy
        });
        let removed = before - st.in_flight.len();
        drop(st);
        if removed > 0 {
            self.released.notify_one();
        }
        removed
    }

    pub fn in_flight(&self) -> usize {
        self.state().in_flight.len()
    }

    pub fn contains(&self, receipt_token: &str) -> bool {
        self.state().in_flight.contains_key(receipt_token)
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Signalled whenever a delivery leaves the in-flight set.
    pub fn released(&self) -> &Notify {
        &self.released
    }
}
