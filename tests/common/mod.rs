//! In-memory queue standing in for SQS.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqs_bridge::errors::BridgeError;
use sqs_bridge::ingest::{Message, PollRequest, QueueClient};

#[derive(Default)]
pub struct FakeState {
    pub pending: VecDeque<Message>,
    /// Receive calls left to fail before serving messages.
    pub receive_failures: usize,
    /// Delete calls left to fail.
    pub delete_failures: usize,
    pub delete_delay: Option<Duration>,
    /// `max_messages` of every receive issued.
    pub receives: Vec<u8>,
    /// Every delete attempted, failed ones included.
    pub deletes: Vec<String>,
    pub deletes_running: usize,
    pub max_deletes_running: usize,
    pub sent: Vec<String>,
    next_id: usize,
}

#[derive(Clone, Default)]
pub struct FakeQueue {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeQueue {
    pub fn with_messages<I, S>(bodies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let q = Self::default();
        for body in bodies {
            q.push(body);
        }
        q
    }

    pub fn push(&self, body: impl Into<String>) -> String {
        let mut st = self.state.lock().unwrap();
        st.next_id += 1;
        let id = st.next_id.to_string();
        let body: String = body.into();
        let msg = Message::new(id.clone(), format!("r{id}"), body);
        st.pending.push_back(msg);
        id
    }

    pub fn fail_receives(&self, n: usize) {
        self.state.lock().unwrap().receive_failures = n;
    }

    pub fn fail_deletes(&self, n: usize) {
        self.state.lock().unwrap().delete_failures = n;
    }

    pub fn slow_deletes(&self, delay: Duration) {
        self.state.lock().unwrap().delete_delay = Some(delay);
    }

    pub fn receive_calls(&self) -> usize {
        self.state.lock().unwrap().receives.len()
    }

    pub fn receives(&self) -> Vec<u8> {
        self.state.lock().unwrap().receives.clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn max_deletes_running(&self) -> usize {
        self.state.lock().unwrap().max_deletes_running
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }
}

#[async_trait]
impl QueueClient for FakeQueue {
    type Error = BridgeError;

    async fn receive(&self, request: &PollRequest) -> Result<Vec<Message>, Self::Error> {
        let batch = {
            let mut st = self.state.lock().unwrap();
            st.receives.push(request.max_messages());
            if st.receive_failures > 0 {
                st.receive_failures -= 1;
                return Err(BridgeError::TransientNetwork("connection reset".into()));
            }
            let n = (request.max_messages() as usize).min(st.pending.len());
            st.pending.drain(..n).collect::<Vec<_>>()
        };
        if batch.is_empty() {
            // Stand-in for a long poll that times out.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(batch)
    }

    async fn delete(&self, receipt_token: &str) -> Result<(), Self::Error> {
        let delay = {
            let mut st = self.state.lock().unwrap();
            st.deletes.push(receipt_token.to_string());
            st.deletes_running += 1;
            st.max_deletes_running = st.max_deletes_running.max(st.deletes_running);
            st.delete_delay
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        let mut st = self.state.lock().unwrap();
        st.deletes_running -= 1;
        if st.delete_failures > 0 {
            st.delete_failures -= 1;
            return Err(BridgeError::TransientNetwork("delete timed out".into()));
        }
        Ok(())
    }

    async fn send(&self, body: &str) -> Result<String, Self::Error> {
        self.state.lock().unwrap().sent.push(body.to_string());
        Ok(self.push(body))
    }
}
