//! Receive loop against the queue service.
//!
//! Each `next_batch` issues one bounded receive. Empty results are returned
//! as-is; long polling already paces the loop server-side. Transient failures
//! are retried with exponential backoff until the loop is cancelled or an
//! explicit retry cap runs out.

use futures::Stream;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, warn};

use crate::errors::BridgeError;
use crate::ingest::{Message, PollRequest, QueueClient};
use crate::util::backoff::Backoff;

pub struct PollLoop<C> {
    client: Arc<C>,
    request: PollRequest,
    backoff: Backoff,
    cancel: watch::Receiver<bool>,
}

impl<C> PollLoop<C>
where
    C: QueueClient<Error = BridgeError>,
{
    /// `cancel` flips to `true` to stop the loop; an in-flight receive or
    /// backoff sleep is abandoned immediately.
    pub fn new(
        client: Arc<C>,
        request: PollRequest,
        backoff: Backoff,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            request,
            backoff,
            cancel,
        }
    }

    pub fn request(&self) -> &PollRequest {
        &self.request
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Receive up to `limit` messages (bounded by the configured batch size).
    ///
    /// Returns `None` once cancelled. `Some(Err(..))` only when the retry cap
    /// is exhausted or the client reports a non-transient failure.
    pub async fn next_batch(&mut self, limit: usize) -> Option<Result<Vec<Message>, BridgeError>> {
        let request = self.request.limited_to(limit);
        loop {
            if self.is_cancelled() {
                return None;
            }

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.changed() => return None,
                res = self.client.receive(&request) => res,
            };

            let err = match outcome {
                Ok(batch) => {
                    self.backoff.reset();
                    return Some(Ok(batch));
                }
                Err(e) if e.is_transient() => e,
                Err(e) => {
                    error!(error = %e, "receive failed permanently");
                    return Some(Err(e));
                }
            };

            let Some(delay) = self.backoff.next_delay() else {
                error!(error = %err, attempts = self.backoff.attempts(), "receive retries exhausted");
                return Some(Err(err));
            };
            warn!(error = %err, attempt = self.backoff.attempts(), ?delay, "receive failed; backing off");

            tokio::select! {
                biased;
                _ = self.cancel.changed() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Lazy, unbounded sequence of batches, each of up to `limit` messages.
    /// Empty batches are yielded too. Ends when cancelled.
    pub fn into_stream(self, limit: usize) -> impl Stream<Item = Result<Vec<Message>, BridgeError>> {
        futures::stream::unfold(self, move |mut poll| async move {
            poll.next_batch(limit).await.map(|res| (res, poll))
        })
    }
}
