//! SQS integration via `aws-sdk-sqs`.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{Message as SqsMessage, MessageSystemAttributeName};
use aws_sdk_sqs::Client;
use std::collections::HashMap;
use tracing::debug;

use crate::errors::BridgeError;
use crate::ingest::{Message, PollRequest, QueueClient};

/// Build an SQS client from environment (AWS_* vars, optional endpoint override).
pub async fn create_sqs_client_from_env(region: &str, endpoint_url: Option<&str>) -> Client {
    dotenvy::dotenv().ok();
    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
    if let Some(url) = endpoint_url {
        loader = loader.endpoint_url(url);
    }
    let cfg = loader.load().await;
    Client::new(&cfg)
}

/// `QueueClient` bound to one queue URL. Cloning shares the SDK connection pool.
#[derive(Clone, Debug)]
pub struct SqsQueueClient {
    client: Client,
    queue_url: String,
}

impl SqsQueueClient {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    pub fn sdk(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    type Error = BridgeError;

    async fn receive(&self, request: &PollRequest) -> Result<Vec<Message>, Self::Error> {
        let mut req = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(i32::from(request.max_messages()))
            .wait_time_seconds(request.wait_seconds() as i32)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .message_attribute_names("All");
        if request.visibility_timeout_seconds() > 0 {
            req = req.visibility_timeout(request.visibility_timeout_seconds() as i32);
        }

        let out = req
            .send()
            .await
            .map_err(|e| BridgeError::TransientNetwork(DisplayErrorContext(e).to_string()))?;

        let messages: Vec<Message> = out
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(convert_message)
            .collect();
        debug!(queue = %self.queue_url, count = messages.len(), "received batch");
        Ok(messages)
    }

    async fn delete(&self, receipt_token: &str) -> Result<(), Self::Error> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_token)
            .send()
            .await
            .map_err(|e| BridgeError::TransientNetwork(DisplayErrorContext(e).to_string()))?;
        Ok(())
    }

    async fn send(&self, body: &str) -> Result<String, Self::Error> {
        let out = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| BridgeError::TransientNetwork(DisplayErrorContext(e).to_string()))?;
        Ok(out.message_id().unwrap_or_default().to_string())
    }
}

/// Flatten an SDK message into a `Message`. Deliveries without a receipt
/// handle cannot be acknowledged and are dropped.
pub fn convert_message(msg: SqsMessage) -> Option<Message> {
    let receipt = msg.receipt_handle()?.to_string();
    let id = msg.message_id().unwrap_or_default().to_string();
    let body = msg.body().unwrap_or_default().to_string();

    let mut attributes = HashMap::new();
    if let Some(attrs) = msg.attributes() {
        for (key, value) in attrs {
            attributes.insert(key.as_str().to_string(), value.clone());
        }
    }
    if let Some(attrs) = msg.message_attributes() {
        for (key, value) in attrs {
            if let Some(s) = value.string_value() {
                attributes.insert(key.clone(), s.to_string());
            }
        }
    }

    Some(Message::new(id, receipt, body).with_attributes(attributes))
}
