use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use thiserror::Error;

// getTimeline rejects larger pages with a 400
pub const MAX_TIMELINE_LIMIT: u16 = 100;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub bluesky: BlueskyConfig,

    #[envconfig(nested = true)]
    pub registry: RegistryConfig,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(from = "KAFKA_TOPIC", default = "BlueSkyMessages")]
    pub kafka_topic: NonEmptyString,

    // Sleep after a cycle that processed the whole snapshot
    #[envconfig(from = "HEALTHY_INTERVAL_MS", default = "60000")]
    pub healthy_interval: EnvMsDuration,

    // Sleep after a failed cycle, must stay below the healthy interval
    #[envconfig(from = "FAILURE_INTERVAL_MS", default = "15000")]
    pub failure_interval: EnvMsDuration,

    #[envconfig(from = "DEDUP_CAPACITY", default = "100000")]
    pub dedup_capacity: u64,

    #[envconfig(from = "DEDUP_TTL_SECS", default = "86400")]
    pub dedup_ttl_secs: u64,

    // 0 drops posts whose delivery failed, anything else requeues up to that many
    #[envconfig(from = "REDELIVERY_CAPACITY", default = "0")]
    pub redelivery_capacity: usize,

    #[envconfig(from = "SHUTDOWN_DRAIN_TIMEOUT_MS", default = "30000")]
    pub shutdown_drain_timeout: EnvMsDuration,

    #[envconfig(from = "HTTP_TIMEOUT_MS", default = "10000")]
    pub http_timeout: EnvMsDuration,
}

#[derive(Envconfig, Clone)]
pub struct BlueskyConfig {
    #[envconfig(from = "BLUESKY_SERVICE", default = "https://bsky.social")]
    pub service: String,

    #[envconfig(from = "BLUESKY_USERNAME")]
    pub username: String,

    #[envconfig(from = "BLUESKY_PASSWORD")]
    pub password: String,

    #[envconfig(from = "TIMELINE_LIMIT", default = "50")]
    pub timeline_limit: u16,
}

#[derive(Envconfig, Clone)]
pub struct RegistryConfig {
    #[envconfig(from = "SCHEMA_REGISTRY_URL")]
    pub url: String,

    #[envconfig(from = "SCHEMA_REGISTRY_API_KEY")]
    pub api_key: Option<String>,

    #[envconfig(from = "SCHEMA_REGISTRY_API_SECRET")]
    pub api_secret: Option<String>,

    #[envconfig(
        from = "SCHEMA_SUBJECT",
        default = "com.example.bluesky.BlueSkyMessage"
    )]
    pub subject: String,
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(from = "KAFKA_BROKER", default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(from = "KAFKA_CLIENT_ID", default = "bluesky-bridge")]
    pub kafka_client_id: String,

    #[envconfig(from = "KAFKA_TLS", default = "false")]
    pub kafka_tls: bool,

    #[envconfig(from = "KAFKA_USERNAME")]
    pub kafka_sasl_username: Option<String>,

    #[envconfig(from = "KAFKA_PASSWORD")]
    pub kafka_sasl_password: Option<String>,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("healthy interval ({healthy:?}) must be longer than failure interval ({failure:?})")]
    IntervalOrdering {
        healthy: time::Duration,
        failure: time::Duration,
    },
    #[error("failure interval must be non-zero")]
    ZeroFailureInterval,
    #[error("dedup capacity must be non-zero")]
    ZeroDedupCapacity,
    #[error("timeline limit must be between 1 and {max}, got {0}", max = MAX_TIMELINE_LIMIT)]
    TimelineLimit(u16),
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn dedup_ttl(&self) -> time::Duration {
        time::Duration::from_secs(self.dedup_ttl_secs)
    }

    /// Reject settings the ingestion loop cannot run with. A zero failure
    /// interval would hot-loop against a broken source.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_intervals(self.healthy_interval.0, self.failure_interval.0)?;
        if self.dedup_capacity == 0 {
            return Err(ConfigError::ZeroDedupCapacity);
        }
        if !(1..=MAX_TIMELINE_LIMIT).contains(&self.bluesky.timeline_limit) {
            return Err(ConfigError::TimelineLimit(self.bluesky.timeline_limit));
        }
        Ok(())
    }
}

pub fn validate_intervals(
    healthy: time::Duration,
    failure: time::Duration,
) -> Result<(), ConfigError> {
    if failure.is_zero() {
        return Err(ConfigError::ZeroFailureInterval);
    }
    if healthy <= failure {
        return Err(ConfigError::IntervalOrdering { healthy, failure });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
