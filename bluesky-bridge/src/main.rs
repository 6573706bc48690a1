use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error};
use bluesky_bridge::{
    config::Config,
    dedup::Deduplicator,
    health::HealthRegistry,
    ingest::{IngestionLoop, LoopSettings},
    publish::kafka::KafkaPublisher,
    redelivery::RedeliveryPolicy,
    schema::registry::ConfluentRegistry,
    server::{router, serve, setup_metrics_recorder},
    shutdown::spawn_signal_listener,
    source::bluesky::BlueskyClient,
};
use envconfig::Envconfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

fn start_health_liveness_server(config: &Config, liveness: HealthRegistry) -> JoinHandle<()> {
    let metrics = match setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!("failed to install metrics recorder, /metrics disabled: {}", e);
            None
        }
    };
    let router = router(liveness, metrics);
    let bind = config.bind();

    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to serve health endpoints on {}: {}", bind, e);
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().context("failed to load configuration")?;
    config.validate()?;

    let liveness = HealthRegistry::new("liveness");
    start_health_liveness_server(&config, liveness.clone());

    let kafka_liveness = liveness
        .register("kafka_producer", Duration::from_secs(30))
        .await;
    let publisher = KafkaPublisher::new(&config.kafka, Some(kafka_liveness))
        .context("failed to create kafka producer")?;

    let registry = ConfluentRegistry::new(
        &config.registry.url,
        config.registry.api_key.clone(),
        config.registry.api_secret.clone(),
        config.http_timeout.0,
    )?;

    let source = BlueskyClient::new(
        &config.bluesky.service,
        config.bluesky.username.clone(),
        config.bluesky.password.clone(),
        config.bluesky.timeline_limit,
        config.http_timeout.0,
    )?;

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone()).context("failed to install signal handlers")?;

    // A cycle may spend a few request timeouts on top of the healthy sleep
    let loop_deadline = config.healthy_interval.0 + config.http_timeout.0 * 4;
    let loop_liveness = liveness.register("ingestion_loop", loop_deadline).await;

    let settings = LoopSettings {
        topic: config.kafka_topic.as_str().to_owned(),
        subject: config.registry.subject.clone(),
        healthy_interval: config.healthy_interval.0,
        failure_interval: config.failure_interval.0,
        drain_timeout: config.shutdown_drain_timeout.0,
        redelivery: RedeliveryPolicy::from_capacity(config.redelivery_capacity),
    };

    let ingestion = IngestionLoop::new(
        Arc::new(source),
        Arc::new(registry),
        Arc::new(publisher),
        Deduplicator::new(config.dedup_capacity, config.dedup_ttl()),
        settings,
        shutdown,
    )
    .with_liveness(loop_liveness);

    ingestion.run().await?;

    info!("Shutting down");
    Ok(())
}
