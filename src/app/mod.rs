//! App runtime: consume → handle → acknowledge loop (hot path).
//!
//! Demand equals free worker slots: `permits` is granted up front and one
//! more unit is granted each time a handler task finishes, so at most
//! `permits` messages are being handled at once.

use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::bridge::DemandBridge;
use crate::errors::BridgeError;
use crate::ingest::{Message, QueueClient};

/// Run until `shutdown` resolves, the source is cancelled, or the poll loop
/// fails terminally. In-progress handlers are drained before returning.
///
/// Handler success acknowledges the message; failure abandons it so the
/// service redelivers it after the visibility timeout.
pub async fn run<C, H, Fut, S>(
    source: DemandBridge<C>,
    handler: H,
    permits: usize,
    shutdown: S,
) -> Result<(), BridgeError>
where
    C: QueueClient<Error = BridgeError>,
    H: Fn(Message) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    S: Future<Output = ()>,
{
    let tracker = source.tracker();
    let mut join = JoinSet::new();
    let mut outcome = Ok(());

    source.request(permits.max(1) as u64);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested: draining");
                break;
            }
            next = source.next() => {
                match next {
                    Some(Ok(msg)) => {
                        let handler = handler.clone();
                        let tracker = Arc::clone(&tracker);
                        join.spawn(async move {
                            debug!(msg_id = %msg.id(), "handling message");
                            match handler(msg.clone()).await {
                                Ok(()) => {
                                    if let Err(e) = tracker.acknowledge(&msg).await {
                                        error!(error = %e, msg_id = %msg.id(), "ack failed");
                                    }
                                }
                                Err(e) => {
                                    error!(error = ?e, msg_id = %msg.id(), "handler failed; leaving for redelivery");
                                    tracker.abandon(&msg);
                                }
                            }
                        });
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "source failed");
                        outcome = Err(e);
                        break;
                    }
                    None => break,
                }
            }
            Some(res) = join.join_next() => {
                source.request(1);
                if let Err(e) = res {
                    error!(error = ?e, "task join error");
                }
            }
        }
    }

    source.cancel();
    while let Some(res) = join.join_next().await {
        if let Err(e) = res {
            error!(error = ?e, "task join error during drain");
        }
    }

    outcome
}
