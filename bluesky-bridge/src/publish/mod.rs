use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod kafka;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("failed to connect to kafka brokers: {0}")]
    Connect(String),
    #[error("broker rejected message for {topic}: {reason}")]
    Rejected { topic: String, reason: String },
    #[error("message for {0} was canceled before delivery")]
    Canceled(String),
    #[error("failed to drain in-flight messages: {0}")]
    Drain(String),
}

/// Delivery of encoded payloads to the message bus.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Verify the broker is reachable before the first publish.
    async fn connect(&self) -> Result<(), DeliveryError>;

    /// Publish one payload, returning once the broker acknowledged it.
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(), DeliveryError>;

    /// Block until every in-flight publish completed or failed, or the
    /// timeout elapsed.
    async fn drain(&self, timeout: Duration) -> Result<(), DeliveryError>;
}
