//! Ingest abstraction
//!
//! Overview
//! --------
//! Minimal trait representing the queue service the bridge polls. The
//! concrete implementation is `crate::sqs::SqsQueueClient`; tests use
//! in-memory fakes.

use bytes::Bytes;
use std::collections::HashMap;

use crate::errors::BridgeError;

/// Hard service limit on messages per receive call.
pub const MAX_MESSAGES_PER_POLL: u8 = 10;

/// One delivery of a queue message.
///
/// The receipt token is only valid for this delivery; a redelivered message
/// carries the same id but a fresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: String,
    receipt_token: String,
    body: Bytes,
    attributes: HashMap<String, String>,
}

impl Message {
    pub fn new(id: impl Into<String>, receipt_token: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            receipt_token: receipt_token.into(),
            body: body.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn receipt_token(&self) -> &str {
        &self.receipt_token
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }
}

/// Parameters of one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollRequest {
    max_messages: u8,
    wait_seconds: u32,
    visibility_timeout_seconds: u32,
}

impl PollRequest {
    pub fn new(
        max_messages: u8,
        wait_seconds: u32,
        visibility_timeout_seconds: u32,
    ) -> Result<Self, BridgeError> {
        if !(1..=MAX_MESSAGES_PER_POLL).contains(&max_messages) {
            return Err(BridgeError::FatalConfig(format!(
                "max messages per poll must be within 1..={MAX_MESSAGES_PER_POLL}, got {max_messages}"
            )));
        }
        Ok(Self {
            max_messages,
            wait_seconds,
            visibility_timeout_seconds,
        })
    }

    /// Same request asking for at most `limit` messages (never below one).
    pub fn limited_to(&self, limit: usize) -> Self {
        let capped = limit.clamp(1, self.max_messages as usize) as u8;
        Self {
            max_messages: capped,
            ..*self
        }
    }

    pub fn max_messages(&self) -> u8 {
        self.max_messages
    }

    pub fn wait_seconds(&self) -> u32 {
        self.wait_seconds
    }

    /// Zero means the queue's configured default.
    pub fn visibility_timeout_seconds(&self) -> u32 {
        self.visibility_timeout_seconds
    }
}

/// Narrow view of the queue service.
///
/// Implementations must be safe to call concurrently: the poll task and the
/// ack tracker share one client.
#[async_trait::async_trait]
pub trait QueueClient: Send + Sync + 'static {
    type Error: std::fmt::Display + Send + Sync + 'static;

    /// Receive up to `request.max_messages()` messages; may return none.
    async fn receive(&self, request: &PollRequest) -> Result<Vec<Message>, Self::Error>;

    /// Delete one delivery so the service does not redeliver it.
    async fn delete(&self, receipt_token: &str) -> Result<(), Self::Error>;

    /// Enqueue a body, returning the service-assigned message id.
    async fn send(&self, body: &str) -> Result<String, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_request_rejects_out_of_range_batch() {
        assert!(matches!(
            PollRequest::new(0, 20, 30),
            Err(BridgeError::FatalConfig(_))
        ));
        assert!(matches!(
            PollRequest::new(11, 20, 30),
            Err(BridgeError::FatalConfig(_))
        ));
        assert!(PollRequest::new(10, 0, 0).is_ok());
    }

    #[test]
    fn limited_request_stays_in_range() {
        let req = PollRequest::new(10, 20, 30).unwrap();
        assert_eq!(req.limited_to(3).max_messages(), 3);
        assert_eq!(req.limited_to(0).max_messages(), 1);
        assert_eq!(req.limited_to(50).max_messages(), 10);
        assert_eq!(req.limited_to(3).wait_seconds(), 20);
    }
}
