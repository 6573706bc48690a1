use apache_avro::{to_avro_datum, Schema};
use async_trait::async_trait;
use thiserror::Error;

use crate::normalize::NormalizedMessage;

pub mod registry;

pub const BLUESKY_MESSAGE_SCHEMA: &str = r#"{
  "type": "record",
  "name": "BlueSkyMessage",
  "namespace": "com.example.bluesky",
  "fields": [
    { "name": "author", "type": "string" },
    { "name": "text", "type": "string" },
    { "name": "postedAt", "type": "string" },
    { "name": "images", "type": "int" },
    { "name": "hashtags", "type": { "type": "array", "items": "string" } },
    { "name": "mentions", "type": { "type": "array", "items": "string" } },
    { "name": "linkCount", "type": "int" },
    { "name": "repostBy", "type": ["null", "string"], "default": null },
    { "name": "replyTo", "type": ["null", "string"], "default": null },
    { "name": "likeCount", "type": "int" },
    { "name": "repostCount", "type": "int" },
    { "name": "replyCount", "type": "int" },
    { "name": "quoteCount", "type": "int" },
    { "name": "lang", "type": ["null", "string"], "default": null }
  ]
}"#;

// Confluent wire format: magic byte, then the big-endian schema id
const MAGIC_BYTE: u8 = 0;
pub const WIRE_HEADER_LEN: usize = 5;

/// Identifier the registry assigned to our schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaId(pub u32);

impl std::fmt::Display for SchemaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid schema registry url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to reach schema registry: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("schema registry rejected the schema with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("schema does not parse: {0}")]
    InvalidSchema(String),
}

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("record does not match schema {schema_id}: {reason}")]
    SchemaMismatch { schema_id: SchemaId, reason: String },
}

/// Registration is idempotent server-side: the same schema under the same
/// subject always yields the same id.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn register(&self, subject: &str, schema: &str) -> Result<SchemaId, RegistryError>;
}

pub fn message_schema() -> Result<Schema, RegistryError> {
    Schema::parse_str(BLUESKY_MESSAGE_SCHEMA).map_err(|e| RegistryError::InvalidSchema(e.to_string()))
}

/// A registered schema, bound once at startup and reused for every message.
#[derive(Debug, Clone)]
pub struct SchemaEncoder {
    schema: Schema,
    id: SchemaId,
}

impl SchemaEncoder {
    pub fn new(schema: Schema, id: SchemaId) -> Self {
        Self { schema, id }
    }

    /// Register the message schema and bind an encoder to the returned id.
    pub async fn register(
        registry: &dyn SchemaRegistry,
        subject: &str,
    ) -> Result<Self, RegistryError> {
        let schema = message_schema()?;
        let id = registry.register(subject, BLUESKY_MESSAGE_SCHEMA).await?;
        Ok(Self::new(schema, id))
    }

    pub fn id(&self) -> SchemaId {
        self.id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn encode(&self, message: &NormalizedMessage) -> Result<Vec<u8>, EncodingError> {
        let mismatch = |e: apache_avro::Error| EncodingError::SchemaMismatch {
            schema_id: self.id,
            reason: e.to_string(),
        };

        let value = apache_avro::to_value(message)
            .map_err(mismatch)?
            .resolve(&self.schema)
            .map_err(mismatch)?;
        let datum = to_avro_datum(&self.schema, value).map_err(mismatch)?;

        let mut payload = Vec::with_capacity(WIRE_HEADER_LEN + datum.len());
        payload.push(MAGIC_BYTE);
        payload.extend_from_slice(&self.id.0.to_be_bytes());
        payload.extend_from_slice(&datum);
        Ok(payload)
    }
}

/// Split a wire payload into its schema id and Avro datum.
pub fn split_payload(payload: &[u8]) -> Option<(SchemaId, &[u8])> {
    if payload.len() < WIRE_HEADER_LEN || payload[0] != MAGIC_BYTE {
        return None;
    }
    let id = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
    Some((SchemaId(id), &payload[WIRE_HEADER_LEN..]))
}
