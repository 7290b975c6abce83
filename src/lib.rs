pub mod ack;
pub mod app;
pub mod bridge;
pub mod config;
pub mod emit;
pub mod errors;
pub mod ingest;
pub mod poll;
pub mod sqs;
pub mod util;
