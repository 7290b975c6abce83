//! Sink side: enqueue message bodies.
//!
//! Sends are independent; `send_all` runs up to `parallelism` of them at
//! once and stops at the first failure.

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::BridgeError;
use crate::ingest::QueueClient;

#[derive(Clone)]
pub struct SqsSink<C> {
    client: Arc<C>,
    parallelism: usize,
}

impl<C> SqsSink<C>
where
    C: QueueClient<Error = BridgeError>,
{
    pub fn new(client: Arc<C>, parallelism: usize) -> Self {
        Self {
            client,
            parallelism: parallelism.max(1),
        }
    }

    /// Enqueue one body, returning the assigned message id.
    pub async fn send(&self, body: &str) -> Result<String, BridgeError> {
        let id = self.client.send(body).await?;
        debug!(msg_id = %id, bytes = body.len(), "sent");
        Ok(id)
    }

    /// Drain `bodies` into the queue. Returns the ids in completion order.
    pub async fn send_all<S>(&self, bodies: S) -> Result<Vec<String>, BridgeError>
    where
        S: Stream<Item = String>,
    {
        let sends = bodies
            .map(|body| {
                let client = Arc::clone(&self.client);
                async move { client.send(&body).await }
            })
            .buffer_unordered(self.parallelism);
        futures::pin_mut!(sends);

        let mut ids = Vec::new();
        while let Some(res) = sends.next().await {
            ids.push(res?);
        }
        info!(count = ids.len(), "sink drained");
        Ok(ids)
    }
}
