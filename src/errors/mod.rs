//! Error types for sqs-bridge
//!
//! Overview
//! --------
//! Canonical error enumeration used across the poll, bridge, and ack layers.
//! SDK errors are mapped into these variants at the `sqs` module edge.
//!
//! Taxonomy
//! --------
//! - `TransientNetwork`: receive/delete/send failures. Retried by the poll
//!   loop; only surfaced when an explicit retry cap is exhausted.
//! - `Ack`: a delete call failed. The message stays in flight and the caller
//!   may retry; the service redelivers it after the visibility timeout.
//! - `FatalConfig`: invalid settings, raised at construction, never retried.
//!
//! Concurrency / Logging
//! ---------------------
//! Errors are `Send + Sync` and implement Display via `thiserror`.
//! Use `tracing` for context at call sites (`error!(...);`).
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// Network or service failure talking to the queue endpoint.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error(transparent)]
    Ack(#[from] AckError),

    /// Invalid batch size, timeouts, or missing required settings.
    #[error("Fatal configuration error: {0}")]
    FatalConfig(String),

    #[error("Unknown error: {0}")]
    Unknown(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// A delete call for one delivery failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("acknowledge failed for receipt {receipt_token}: {reason}")]
pub struct AckError {
    pub receipt_token: String,
    pub reason: String,
}

impl BridgeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::TransientNetwork(_))
    }
}
