//! Source settings and environment-driven worker configuration.

use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::BridgeError;
use crate::ingest::{PollRequest, MAX_MESSAGES_PER_POLL};
use crate::util::backoff::Backoff;

/// Longest long-poll the service accepts.
pub const MAX_WAIT_TIME_SECONDS: u32 = 20;
/// Twelve hours, the service ceiling for visibility timeouts.
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u32 = 43_200;

/// Tuning for one queue subscription.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceSettings {
    /// Messages requested per receive call, 1..=10.
    pub max_messages_per_poll: u8,
    /// Server-side long-poll duration.
    pub wait_time_seconds: u32,
    /// Zero leaves the queue default in place.
    pub visibility_timeout_seconds: u32,
    /// Upper bound on buffered plus unacknowledged deliveries.
    pub max_in_flight: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// `None` retries receive failures forever.
    pub retry_max_attempts: Option<u32>,
    /// How long an unacknowledged delivery is tracked locally.
    /// Defaults to the visibility timeout.
    pub stale_after_ms: Option<u64>,
    /// Concurrent delete calls allowed per tracker.
    pub max_concurrent_deletes: usize,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            max_messages_per_poll: MAX_MESSAGES_PER_POLL,
            wait_time_seconds: MAX_WAIT_TIME_SECONDS,
            visibility_timeout_seconds: 30,
            max_in_flight: 100,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            retry_max_attempts: None,
            stale_after_ms: None,
            max_concurrent_deletes: 10,
        }
    }
}

impl SourceSettings {
    /// Settings from the three knobs most callers touch; everything else
    /// keeps its default.
    pub fn new(
        wait_time_seconds: u32,
        max_in_flight: usize,
        max_messages_per_poll: u8,
    ) -> Result<Self, BridgeError> {
        let settings = Self {
            wait_time_seconds,
            max_in_flight,
            max_messages_per_poll,
            ..Self::default()
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn with_visibility_timeout(mut self, seconds: u32) -> Self {
        self.visibility_timeout_seconds = seconds;
        self
    }

    pub fn with_retry(mut self, base: Duration, max: Duration, attempts: Option<u32>) -> Self {
        self.retry_base_delay_ms = base.as_millis() as u64;
        self.retry_max_delay_ms = max.as_millis() as u64;
        self.retry_max_attempts = attempts;
        self
    }

    pub fn with_stale_after(mut self, window: Duration) -> Self {
        self.stale_after_ms = Some(window.as_millis() as u64);
        self
    }

    pub fn with_max_concurrent_deletes(mut self, n: usize) -> Self {
        self.max_concurrent_deletes = n;
        self
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        let fail = |msg: String| Err(BridgeError::FatalConfig(msg));
        if !(1..=MAX_MESSAGES_PER_POLL).contains(&self.max_messages_per_poll) {
            return fail(format!(
                "max_messages_per_poll must be within 1..={MAX_MESSAGES_PER_POLL}, got {}",
                self.max_messages_per_poll
            ));
        }
        if self.wait_time_seconds > MAX_WAIT_TIME_SECONDS {
            return fail(format!(
                "wait_time_seconds must be at most {MAX_WAIT_TIME_SECONDS}, got {}",
                self.wait_time_seconds
            ));
        }
        if self.visibility_timeout_seconds > MAX_VISIBILITY_TIMEOUT_SECONDS {
            return fail(format!(
                "visibility_timeout_seconds must be at most {MAX_VISIBILITY_TIMEOUT_SECONDS}, got {}",
                self.visibility_timeout_seconds
            ));
        }
        if self.max_in_flight == 0 {
            return fail("max_in_flight must be positive".into());
        }
        if self.retry_base_delay_ms == 0 || self.retry_max_delay_ms < self.retry_base_delay_ms {
            return fail(format!(
                "retry delays must satisfy 0 < base <= max, got base={}ms max={}ms",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            ));
        }
        if self.stale_after_ms == Some(0) {
            return fail("stale_after_ms must be positive".into());
        }
        if self.max_concurrent_deletes == 0 {
            return fail("max_concurrent_deletes must be positive".into());
        }
        Ok(())
    }

    pub fn poll_request(&self) -> Result<PollRequest, BridgeError> {
        PollRequest::new(
            self.max_messages_per_poll,
            self.wait_time_seconds,
            self.visibility_timeout_seconds,
        )
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
            self.retry_max_attempts,
        )
    }

    pub fn stale_after(&self) -> Duration {
        match (self.stale_after_ms, self.visibility_timeout_seconds) {
            (Some(ms), _) => Duration::from_millis(ms),
            (None, 0) => Duration::from_secs(30),
            (None, vis) => Duration::from_secs(vis as u64),
        }
    }
}

/// Worker configuration for the `consumer` binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub queue_url: String,
    /// Overrides the AWS endpoint, e.g. a local ElasticMQ.
    pub endpoint_url: Option<String>,
    pub region: String,
    pub settings: SourceSettings,
    /// Messages handled concurrently by `app::run`.
    pub worker_permits: usize,
}

pub fn load_config() -> Result<Config, BridgeError> {
    dotenv().ok();
    let queue_url = env::var("SQS_QUEUE_URL")
        .map_err(|_| BridgeError::FatalConfig("SQS_QUEUE_URL is not set".into()))?;
    let endpoint_url = env::var("SQS_ENDPOINT_URL").ok();
    let region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".into());

    let defaults = SourceSettings::default();
    let settings = SourceSettings {
        max_messages_per_poll: env_or("SQS_MAX_MESSAGES", defaults.max_messages_per_poll)?,
        wait_time_seconds: env_or("SQS_WAIT_TIME_SECONDS", defaults.wait_time_seconds)?,
        visibility_timeout_seconds: env_or(
            "SQS_VISIBILITY_TIMEOUT_SECONDS",
            defaults.visibility_timeout_seconds,
        )?,
        max_in_flight: env_or("SQS_MAX_IN_FLIGHT", defaults.max_in_flight)?,
        ..defaults
    };
    settings.validate()?;

    let worker_permits = env_or("SQS_WORKER_PERMITS", 8usize)?;
    if worker_permits == 0 {
        return Err(BridgeError::FatalConfig("SQS_WORKER_PERMITS must be positive".into()));
    }

    Ok(Config {
        queue_url,
        endpoint_url,
        region,
        settings,
        worker_permits,
    })
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, BridgeError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| BridgeError::FatalConfig(format!("{key}={raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}
