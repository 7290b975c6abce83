//! Demand-driven view of the poll loop.
//!
//! Overview
//! --------
//! `DemandBridge` owns one subscription: a background task running the
//! `PollLoop`, a buffer of received-but-undelivered messages, and a demand
//! counter raised by `request(n)` and lowered on every delivery.
//!
//! Demand accounting
//! -----------------
//! The poll task only asks the service for
//! `min(batch size, demand - buffered, max_in_flight - in_flight - buffered)`
//! messages. When that is zero the task parks (`Phase::Suspended`) until
//! demand rises or an acknowledgement frees in-flight room. Delivery is also
//! gated on positive demand, so the consumer never sees more messages than it
//! has requested in total.
//!
//! Ordering / cancellation
//! -----------------------
//! Messages within a batch are delivered in service order; batches are
//! delivered in arrival order. `cancel` is synchronous and idempotent: no
//! receive is issued afterwards and buffered messages are dropped without
//! acknowledgement. Dropping the bridge cancels it.

use futures::Stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::ack::AckTracker;
use crate::config::SourceSettings;
use crate::errors::{AckError, BridgeError};
use crate::ingest::{Message, QueueClient};
use crate::poll::PollLoop;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Polling,
    Suspended,
    Cancelled,
}

struct DemandState {
    demand: u64,
    buffer: VecDeque<Message>,
    phase: Phase,
    /// Set when the poll loop gives up; handed to the consumer once.
    terminal: Option<BridgeError>,
    finished: bool,
}

impl DemandState {
    fn room(&self, batch: usize, max_in_flight: usize, in_flight: usize) -> usize {
        let buffered = self.buffer.len();
        let wanted = self.demand.saturating_sub(buffered as u64);
        let capacity = max_in_flight.saturating_sub(in_flight + buffered);
        (wanted.min(capacity as u64) as usize).min(batch)
    }
}

struct Shared {
    state: Mutex<DemandState>,
    to_consumer: Notify,
    to_poller: Notify,
    cancel: watch::Sender<bool>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DemandState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub struct DemandBridge<C> {
    shared: Arc<Shared>,
    tracker: Arc<AckTracker<C>>,
    task: JoinHandle<()>,
}

impl<C> DemandBridge<C>
where
    C: QueueClient<Error = BridgeError>,
{
    /// Validate `settings` and start polling. Must be called inside a tokio
    /// runtime. No receive is issued until the first `request`.
    pub fn subscribe(client: Arc<C>, settings: &SourceSettings) -> Result<Self, BridgeError> {
        settings.validate()?;
        let request = settings.poll_request()?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            state: Mutex::new(DemandState {
                demand: 0,
                buffer: VecDeque::new(),
                phase: Phase::Suspended,
                terminal: None,
                finished: false,
            }),
            to_consumer: Notify::new(),
            to_poller: Notify::new(),
            cancel: cancel_tx,
        });
        let tracker = Arc::new(AckTracker::new(
            Arc::clone(&client),
            settings.stale_after(),
            settings.max_concurrent_deletes,
        ));
        let poll = PollLoop::new(client, request, settings.backoff(), cancel_rx.clone());

        let task = tokio::spawn(drive(
            Arc::clone(&shared),
            Arc::clone(&tracker),
            poll,
            cancel_rx,
            settings.max_in_flight,
        ));
        info!(
            batch = settings.max_messages_per_poll,
            wait_secs = settings.wait_time_seconds,
            max_in_flight = settings.max_in_flight,
            "subscription opened"
        );

        Ok(Self {
            shared,
            tracker,
            task,
        })
    }

    /// Allow `n` more deliveries.
    pub fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        {
            let mut st = self.shared.lock();
            if st.phase == Phase::Cancelled {
                return;
            }
            st.demand = st.demand.saturating_add(n);
        }
        self.shared.to_poller.notify_one();
        self.shared.to_consumer.notify_one();
    }

    /// Stop polling and drop undelivered messages. Idempotent.
    pub fn cancel(&self) {
        let discarded = {
            let mut st = self.shared.lock();
            if st.phase == Phase::Cancelled {
                return;
            }
            st.phase = Phase::Cancelled;
            st.demand = 0;
            let n = st.buffer.len();
            st.buffer.clear();
            n
        };
        self.shared.cancel.send_replace(true);
        self.shared.to_poller.notify_one();
        self.shared.to_consumer.notify_one();
        info!(discarded, "subscription cancelled");
    }

    /// Next message within granted demand.
    ///
    /// Waits while demand is zero or nothing is buffered. Returns `None` after
    /// cancellation, and after a terminal poll error has been yielded.
    pub async fn next(&self) -> Option<Result<Message, BridgeError>> {
        loop {
            let notified = self.shared.to_consumer.notified();
            {
                let mut st = self.shared.lock();
                if st.phase == Phase::Cancelled {
                    return None;
                }
                if st.demand > 0 {
                    if let Some(msg) = st.buffer.pop_front() {
                        st.demand -= 1;
                        self.tracker.track(&msg);
                        drop(st);
                        self.shared.to_poller.notify_one();
                        debug!(msg_id = %msg.id(), "delivered");
                        return Some(Ok(msg));
                    }
                }
                if let Some(err) = st.terminal.take() {
                    return Some(Err(err));
                }
                if st.finished {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub async fn acknowledge(&self, message: &Message) -> Result<(), AckError> {
        self.tracker.acknowledge(message).await
    }

    pub fn abandon(&self, message: &Message) {
        self.tracker.abandon(message)
    }

    pub fn tracker(&self) -> Arc<AckTracker<C>> {
        Arc::clone(&self.tracker)
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    /// Granted demand not yet consumed by a delivery.
    pub fn outstanding_demand(&self) -> u64 {
        self.shared.lock().demand
    }

    pub fn buffered(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    /// Consume the bridge as a stream, topping demand up by `prefetch`
    /// whenever it runs dry.
    pub fn into_stream(self, prefetch: u64) -> impl Stream<Item = Result<Message, BridgeError>> {
        let prefetch = prefetch.max(1);
        futures::stream::unfold(self, move |bridge| async move {
            if bridge.outstanding_demand() == 0 {
                bridge.request(prefetch);
            }
            let item = bridge.next().await?;
            Some((item, bridge))
        })
    }
}

impl<C> Drop for DemandBridge<C> {
    fn drop(&mut self) {
        {
            let mut st = self.shared.lock();
            st.phase = Phase::Cancelled;
            st.buffer.clear();
        }
        self.shared.cancel.send_replace(true);
        self.shared.to_poller.notify_one();
        self.task.abort();
    }
}

async fn drive<C>(
    shared: Arc<Shared>,
    tracker: Arc<AckTracker<C>>,
    mut poll: PollLoop<C>,
    mut cancel: watch::Receiver<bool>,
    max_in_flight: usize,
) where
    C: QueueClient<Error = BridgeError>,
{
    let batch = poll.request().max_messages() as usize;
    loop {
        let room = loop {
            let demand_raised = shared.to_poller.notified();
            let released = tracker.released().notified();
            tracker.prune_stale();
            {
                let mut st = shared.lock();
                if st.phase == Phase::Cancelled {
                    return;
                }
                let room = st.room(batch, max_in_flight, tracker.in_flight());
                if room > 0 {
                    st.phase = Phase::Polling;
                    break room;
                }
                if st.phase != Phase::Suspended {
                    debug!(demand = st.demand, buffered = st.buffer.len(), "polling suspended");
                }
                st.phase = Phase::Suspended;
            }
            tokio::select! {
                _ = demand_raised => {}
                _ = released => {}
                _ = cancel.changed() => {}
                _ = tokio::time::sleep(tracker.stale_after()) => {}
            }
        };

        match poll.next_batch(room).await {
            Some(Ok(messages)) => {
                let received = messages.len();
                {
                    let mut st = shared.lock();
                    if st.phase == Phase::Cancelled {
                        debug!(received, "discarding batch received after cancel");
                        return;
                    }
                    st.buffer.extend(messages);
                }
                if received > 0 {
                    shared.to_consumer.notify_one();
                } else {
                    tokio::task::yield_now().await;
                }
            }
            Some(Err(e)) => {
                error!(error = %e, "poll loop terminated");
                {
                    let mut st = shared.lock();
                    st.terminal = Some(e);
                    st.finished = true;
                }
                shared.to_consumer.notify_one();
                return;
            }
            None => return,
        }
    }
}
