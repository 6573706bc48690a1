use std::time::Duration;

use async_trait::async_trait;
use metrics::gauge;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::{debug, error, info};

use super::{DeliveryError, Publisher};
use crate::config::KafkaConfig;
use crate::health::HealthHandle;

pub struct KafkaContext {
    liveness: Option<HealthHandle>,
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        if let Some(liveness) = &self.liveness {
            liveness.report_healthy_blocking();
        }

        gauge!("bluesky_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("bluesky_kafka_producer_queue_depth_limit").set(stats.msg_max as f64);
        gauge!("bluesky_kafka_callback_queue_depth").set(stats.replyq as f64);
    }
}

#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer<KafkaContext>,
}

impl KafkaPublisher {
    /// Build the producer. No network traffic happens until `connect`.
    pub fn new(
        config: &KafkaConfig,
        liveness: Option<HealthHandle>,
    ) -> Result<KafkaPublisher, KafkaError> {
        let client_config = client_config(config);
        debug!("rdkafka configuration: {:?}", client_config);

        let producer = client_config.create_with_context(KafkaContext { liveness })?;
        Ok(KafkaPublisher { producer })
    }
}

fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("client.id", &config.kafka_client_id)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        );

    match (&config.kafka_sasl_username, &config.kafka_sasl_password) {
        (Some(username), Some(password)) => {
            let protocol = if config.kafka_tls {
                "sasl_ssl"
            } else {
                "sasl_plaintext"
            };
            client_config
                .set("security.protocol", protocol)
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }
        _ if config.kafka_tls => {
            client_config.set("security.protocol", "ssl");
        }
        _ => {}
    }

    client_config
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn connect(&self) -> Result<(), DeliveryError> {
        info!("connecting to Kafka brokers...");
        let producer = self.producer.clone();

        // "Ping" the Kafka brokers by requesting metadata
        let metadata = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, Timeout::After(Duration::from_secs(15)))
                .map(|m| m.topics().len())
        })
        .await
        .map_err(|e| DeliveryError::Connect(e.to_string()))?;

        match metadata {
            Ok(topics) => {
                info!("connected to Kafka brokers, found {} topics", topics);
                Ok(())
            }
            Err(e) => {
                error!("failed to fetch metadata from Kafka brokers: {:?}", e);
                Err(DeliveryError::Connect(e.to_string()))
            }
        }
    }

    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(), DeliveryError> {
        let record = FutureRecord {
            topic,
            key,
            payload: Some(payload),
            timestamp: None,
            partition: None,
            headers: None,
        };

        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| DeliveryError::Rejected {
                topic: topic.to_owned(),
                reason: e.to_string(),
            })?;

        match delivery.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((e, _))) => Err(DeliveryError::Rejected {
                topic: topic.to_owned(),
                reason: e.to_string(),
            }),
            Err(_) => Err(DeliveryError::Canceled(topic.to_owned())),
        }
    }

    async fn drain(&self, timeout: Duration) -> Result<(), DeliveryError> {
        let producer = self.producer.clone();
        let in_flight = producer.in_flight_count();
        info!(in_flight, "draining kafka producer");

        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| DeliveryError::Drain(e.to_string()))?
            .map_err(|e| DeliveryError::Drain(e.to_string()))
    }
}
