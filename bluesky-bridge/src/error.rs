use thiserror::Error;

use crate::publish::DeliveryError;
use crate::schema::{EncodingError, RegistryError};
use crate::source::FetchError;

/// Failures while starting up. The bridge can't do useful work without any of
/// these, so they end the process.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("failed to register message schema: {0}")]
    Schema(#[from] RegistryError),
    #[error("failed to connect to broker: {0}")]
    Broker(#[from] DeliveryError),
    #[error("failed to log in to timeline source: {0}")]
    Source(#[from] FetchError),
}

/// Failures that abandon the current polling cycle and send the loop to
/// backoff. Posts named here were already marked seen.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("failed to fetch timeline: {0}")]
    Fetch(#[from] FetchError),
    #[error("failed to encode post {uri}: {source}")]
    Encoding { uri: String, source: EncodingError },
    #[error("failed to publish post {uri}: {source}")]
    Delivery { uri: String, source: DeliveryError },
}

impl CycleError {
    pub fn uri(&self) -> Option<&str> {
        match self {
            CycleError::Fetch(_) => None,
            CycleError::Encoding { uri, .. } | CycleError::Delivery { uri, .. } => Some(uri),
        }
    }
}
