use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use url::Url;

use super::{FetchError, TimelineSource};
use crate::post::{FeedItem, Timeline};

const CREATE_SESSION: &str = "xrpc/com.atproto.server.createSession";
const REFRESH_SESSION: &str = "xrpc/com.atproto.server.refreshSession";
const GET_TIMELINE: &str = "xrpc/app.bsky.feed.getTimeline";

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    refresh_jwt: String,
    handle: String,
}

#[derive(Debug, Deserialize)]
struct XrpcError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

enum TimelineResponse {
    Timeline(Vec<FeedItem>),
    Expired,
}

/// A logged-in Bluesky account. The session is owned here and refreshed in
/// place when the access token expires.
pub struct BlueskyClient {
    service: Url,
    client: Client,
    identifier: String,
    password: String,
    timeline_limit: u16,
    session: RwLock<Option<Session>>,
}

impl BlueskyClient {
    pub fn new(
        service: &str,
        identifier: String,
        password: String,
        timeline_limit: u16,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent("bluesky-bridge")
            .timeout(timeout)
            .build()?;

        // Url::join replaces the last path segment unless it ends in a slash
        let service = if service.ends_with('/') {
            Url::parse(service)?
        } else {
            Url::parse(&format!("{service}/"))?
        };

        Ok(Self {
            service,
            client,
            identifier,
            password,
            timeline_limit,
            session: RwLock::new(None),
        })
    }

    async fn create_session(&self) -> Result<Session, FetchError> {
        let response = self
            .client
            .post(self.service.join(CREATE_SESSION)?)
            .json(&CreateSessionRequest {
                identifier: &self.identifier,
                password: &self.password,
            })
            .send()
            .await?;

        decode(check_status(response).await?).await
    }

    async fn refresh_session(&self, refresh_jwt: &str) -> Result<Session, FetchError> {
        let response = self
            .client
            .post(self.service.join(REFRESH_SESSION)?)
            .bearer_auth(refresh_jwt)
            .send()
            .await?;

        decode(check_status(response).await?).await
    }

    async fn get_timeline(&self, access_jwt: &str) -> Result<TimelineResponse, FetchError> {
        let response = self
            .client
            .get(self.service.join(GET_TIMELINE)?)
            .query(&[("limit", self.timeline_limit)])
            .bearer_auth(access_jwt)
            .send()
            .await?;

        match check_status(response).await {
            Ok(response) => Ok(TimelineResponse::Timeline(
                decode::<Timeline>(response).await?.feed,
            )),
            Err(FetchError::Status { message, .. }) if message.starts_with("ExpiredToken") => {
                Ok(TimelineResponse::Expired)
            }
            Err(e) => Err(e),
        }
    }

    /// Replace an expired session, falling back to a fresh login when the
    /// refresh token is no longer accepted either.
    async fn renew_session(&self, stale: &Session) -> Result<Session, FetchError> {
        let renewed = match self.refresh_session(&stale.refresh_jwt).await {
            Ok(session) => session,
            Err(e) => {
                warn!("failed to refresh session, logging in again: {}", e);
                self.create_session().await?
            }
        };
        *self.session.write().await = Some(renewed.clone());
        Ok(renewed)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, FetchError> {
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

async fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::RateLimited);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<XrpcError>(&body) {
        Ok(XrpcError {
            error: Some(error),
            message,
        }) => match message {
            Some(message) => format!("{error}: {message}"),
            None => error,
        },
        _ => body,
    };

    Err(FetchError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl TimelineSource for BlueskyClient {
    async fn connect(&self) -> Result<(), FetchError> {
        let session = self.create_session().await?;
        info!(handle = %session.handle, "logged in to Bluesky");
        *self.session.write().await = Some(session);
        Ok(())
    }

    async fn fetch_timeline(&self) -> Result<Vec<FeedItem>, FetchError> {
        let session = self
            .session
            .read()
            .await
            .clone()
            .ok_or(FetchError::NotConnected)?;

        match self.get_timeline(&session.access_jwt).await? {
            TimelineResponse::Timeline(feed) => Ok(feed),
            TimelineResponse::Expired => {
                info!("access token expired, renewing session");
                let session = self.renew_session(&session).await?;
                match self.get_timeline(&session.access_jwt).await? {
                    TimelineResponse::Timeline(feed) => Ok(feed),
                    TimelineResponse::Expired => Err(FetchError::Status {
                        status: StatusCode::BAD_REQUEST.as_u16(),
                        message: "ExpiredToken: renewed session was rejected".to_string(),
                    }),
                }
            }
        }
    }
}
