//! sqs-bridge: worker entrypoint
//!
//! Overview
//! --------
//! Subscribes to one SQS queue through the demand bridge, logs each message
//! body, and acknowledges it. Stops on ctrl-c after draining handlers.
//!
//! Error Model
//! -----------
//! - Configuration failures are fatal at startup.
//! - Receive failures are retried inside the bridge; handler or ack failures
//!   are logged and the message is left for redelivery.

use std::sync::Arc;

use tracing::info;
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sqs_bridge::app;
use sqs_bridge::bridge::DemandBridge;
use sqs_bridge::config::load_config;
use sqs_bridge::ingest::Message;
use sqs_bridge::sqs::{create_sqs_client_from_env, SqsQueueClient};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().compact())
        .with(ErrorLayer::default())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    info!("consumer starting");

    let config = load_config()?;
    let sdk = create_sqs_client_from_env(&config.region, config.endpoint_url.as_deref()).await;
    let client = Arc::new(SqsQueueClient::new(sdk, &config.queue_url));
    info!(queue_url = client.queue_url(), "subscribing");

    let source = DemandBridge::subscribe(client, &config.settings)?;
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    app::run(
        source,
        |msg: Message| async move {
            info!(msg_id = %msg.id(), body = %msg.body_str(), "received");
            Ok::<_, anyhow::Error>(())
        },
        config.worker_permits,
        shutdown,
    )
    .await?;

    info!("consumer stopped");
    Ok(())
}
