#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bluesky_bridge::dedup::Deduplicator;
use bluesky_bridge::ingest::{IngestionLoop, LoopSettings};
use bluesky_bridge::normalize::NormalizedMessage;
use bluesky_bridge::post::FeedItem;
use bluesky_bridge::publish::{DeliveryError, Publisher};
use bluesky_bridge::redelivery::RedeliveryPolicy;
use bluesky_bridge::schema::{
    message_schema, split_payload, RegistryError, SchemaId, SchemaRegistry,
};
use bluesky_bridge::source::{FetchError, TimelineSource};

pub const TOPIC: &str = "BlueSkyMessages";
pub const SUBJECT: &str = "com.example.bluesky.BlueSkyMessage";
pub const HEALTHY_INTERVAL: Duration = Duration::from_secs(60);
pub const FAILURE_INTERVAL: Duration = Duration::from_secs(15);

pub fn settings(redelivery: RedeliveryPolicy) -> LoopSettings {
    LoopSettings {
        topic: TOPIC.to_string(),
        subject: SUBJECT.to_string(),
        healthy_interval: HEALTHY_INTERVAL,
        failure_interval: FAILURE_INTERVAL,
        drain_timeout: Duration::from_secs(5),
        redelivery,
    }
}

pub fn post(uri: &str, text: &str) -> FeedItem {
    post_with_record(uri, json!({ "$type": "app.bsky.feed.post", "text": text }))
}

pub fn post_with_record(uri: &str, record: Value) -> FeedItem {
    serde_json::from_value(json!({
        "post": {
            "uri": uri,
            "cid": "bafyreib",
            "author": { "did": "did:plc:alice", "handle": "alice.bsky.social" },
            "record": record,
            "indexedAt": "2024-11-20T10:00:00.000Z"
        }
    }))
    .unwrap()
}

/// Timeline source replaying scripted snapshots, one per fetch. Once the
/// script runs out every fetch returns an empty timeline.
#[derive(Default)]
pub struct FakeSource {
    script: Mutex<VecDeque<Result<Vec<FeedItem>, FetchError>>>,
    fetches: Mutex<Vec<Instant>>,
    reject_login: Mutex<Option<FetchError>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, snapshot: Result<Vec<FeedItem>, FetchError>) {
        self.script.lock().unwrap().push_back(snapshot);
    }

    pub fn reject_login(&self, error: FetchError) {
        *self.reject_login.lock().unwrap() = Some(error);
    }

    pub fn fetch_times(&self) -> Vec<Instant> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl TimelineSource for FakeSource {
    async fn connect(&self) -> Result<(), FetchError> {
        match self.reject_login.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn fetch_timeline(&self) -> Result<Vec<FeedItem>, FetchError> {
        self.fetches.lock().unwrap().push(Instant::now());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Registry handing out one id per distinct schema, like a real registry
/// does for identical re-registrations.
#[derive(Default)]
pub struct FakeRegistry {
    ids: Mutex<HashMap<(String, String), u32>>,
    calls: Mutex<usize>,
    unavailable: Mutex<bool>,
}

impl FakeRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_unavailable(&self) {
        *self.unavailable.lock().unwrap() = true;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl SchemaRegistry for FakeRegistry {
    async fn register(&self, subject: &str, schema: &str) -> Result<SchemaId, RegistryError> {
        *self.calls.lock().unwrap() += 1;
        if *self.unavailable.lock().unwrap() {
            return Err(RegistryError::Rejected {
                status: 503,
                body: "unavailable".to_string(),
            });
        }

        let mut ids = self.ids.lock().unwrap();
        let next = ids.len() as u32 + 1;
        let id = *ids
            .entry((subject.to_owned(), schema.to_owned()))
            .or_insert(next);
        Ok(SchemaId(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherEvent {
    Connected,
    PublishStarted(String),
    Published(String),
    Failed(String),
    Drained,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Publisher recording everything it is asked to do. Failures and slow
/// deliveries can be injected per call.
#[derive(Default)]
pub struct FakePublisher {
    records: Mutex<Vec<Record>>,
    events: Mutex<Vec<PublisherEvent>>,
    failures: Mutex<usize>,
    delay: Mutex<Option<Duration>>,
    reject_connect: Mutex<bool>,
}

impl FakePublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `count` publishes.
    pub fn fail_next(&self, count: usize) {
        *self.failures.lock().unwrap() = count;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn reject_connect(&self) {
        *self.reject_connect.lock().unwrap() = true;
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|record| record.key)
            .collect()
    }

    pub fn events(&self) -> Vec<PublisherEvent> {
        self.events.lock().unwrap().clone()
    }

    fn event(&self, event: PublisherEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn connect(&self) -> Result<(), DeliveryError> {
        if *self.reject_connect.lock().unwrap() {
            return Err(DeliveryError::Connect("no brokers available".to_string()));
        }
        self.event(PublisherEvent::Connected);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(), DeliveryError> {
        let key_str = key.unwrap_or_default().to_owned();
        self.event(PublisherEvent::PublishStarted(key_str.clone()));

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                drop(failures);
                self.event(PublisherEvent::Failed(key_str));
                return Err(DeliveryError::Rejected {
                    topic: topic.to_owned(),
                    reason: "broker unavailable".to_string(),
                });
            }
        }

        self.records.lock().unwrap().push(Record {
            topic: topic.to_owned(),
            key: key.map(str::to_owned),
            payload: payload.to_vec(),
        });
        self.event(PublisherEvent::Published(key_str));
        Ok(())
    }

    async fn drain(&self, _timeout: Duration) -> Result<(), DeliveryError> {
        self.event(PublisherEvent::Drained);
        Ok(())
    }
}

pub struct Harness {
    pub source: Arc<FakeSource>,
    pub registry: Arc<FakeRegistry>,
    pub publisher: Arc<FakePublisher>,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            source: FakeSource::new(),
            registry: FakeRegistry::new(),
            publisher: FakePublisher::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn ingestion_loop(&self, redelivery: RedeliveryPolicy) -> IngestionLoop {
        self.ingestion_loop_with(Deduplicator::new(10_000, Duration::from_secs(3600)), redelivery)
    }

    pub fn ingestion_loop_with(
        &self,
        dedup: Deduplicator,
        redelivery: RedeliveryPolicy,
    ) -> IngestionLoop {
        IngestionLoop::new(
            self.source.clone(),
            self.registry.clone(),
            self.publisher.clone(),
            dedup,
            settings(redelivery),
            self.shutdown.clone(),
        )
    }
}

/// Decode a published payload back into the record it was built from.
pub fn decode(payload: &[u8]) -> (SchemaId, NormalizedMessage) {
    let (id, mut datum) = split_payload(payload).expect("confluent wire header");
    let schema = message_schema().unwrap();
    let value = apache_avro::from_avro_datum(&schema, &mut datum, None).unwrap();
    (id, apache_avro::from_value(&value).unwrap())
}
