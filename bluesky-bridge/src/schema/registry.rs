use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::{RegistryError, SchemaId, SchemaRegistry};

const SCHEMA_REGISTRY_CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    schema_type: &'static str,
    schema: &'a str,
}

#[derive(Deserialize)]
struct RegisterResponse {
    id: u32,
}

/// Client for a Confluent-compatible schema registry.
pub struct ConfluentRegistry {
    base_url: Url,
    client: reqwest::Client,
    credentials: Option<(String, String)>,
}

impl ConfluentRegistry {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        api_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static(SCHEMA_REGISTRY_CONTENT_TYPE),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            base_url: Url::parse(base_url)?,
            client,
            credentials: api_key.map(|key| (key, api_secret.unwrap_or_default())),
        })
    }

    fn versions_url(&self, subject: &str) -> Result<Url, RegistryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                RegistryError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase)
            })?
            .pop_if_empty()
            .extend(["subjects", subject, "versions"]);
        Ok(url)
    }
}

#[async_trait]
impl SchemaRegistry for ConfluentRegistry {
    async fn register(&self, subject: &str, schema: &str) -> Result<SchemaId, RegistryError> {
        let url = self.versions_url(subject)?;
        debug!(%url, "registering schema");

        let mut request = self.client.post(url).json(&RegisterRequest {
            schema_type: "AVRO",
            schema,
        });
        if let Some((key, secret)) = &self.credentials {
            request = request.basic_auth(key, Some(secret));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let RegisterResponse { id } = response.json().await?;
        info!(subject, schema_id = id, "schema registered");
        Ok(SchemaId(id))
    }
}
