use async_trait::async_trait;
use thiserror::Error;

use crate::post::FeedItem;

pub mod bluesky;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to reach timeline service: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode timeline service response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("timeline service rate limited the session")]
    RateLimited,
    #[error("timeline service returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid timeline service url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("no session, connect() must succeed first")]
    NotConnected,
}

/// A timeline the bridge polls. Implementations own their authenticated
/// session; `connect` establishes it once at startup.
#[async_trait]
pub trait TimelineSource: Send + Sync {
    async fn connect(&self) -> Result<(), FetchError>;

    /// Current timeline snapshot, newest first as served.
    async fn fetch_timeline(&self) -> Result<Vec<FeedItem>, FetchError>;
}
