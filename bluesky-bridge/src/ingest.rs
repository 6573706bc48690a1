//! The ingestion loop: fetch, dedup, normalize, encode, publish.
//!
//! Modelled as an explicit state machine so callers (and tests) can drive it
//! one transition at a time with [`IngestionLoop::step`], or to completion
//! with [`IngestionLoop::run`]. Shutdown is observed only while fetching or
//! sleeping; a publish that has started always runs to completion.
//!
//! Posts are marked seen before any fallible work. An encoding failure drops
//! the post for the lifetime of the process. A delivery failure drops it too,
//! unless the redelivery queue is enabled, in which case the encoded payload
//! is retried at the start of the next cycle.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dedup::Deduplicator;
use crate::error::{CycleError, StartupError};
use crate::health::HealthHandle;
use crate::normalize::normalize_item;
use crate::post::FeedItem;
use crate::publish::Publisher;
use crate::redelivery::{PendingDelivery, RedeliveryPolicy, RedeliveryQueue};
use crate::schema::{SchemaEncoder, SchemaRegistry};
use crate::source::TimelineSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Polling,
    Backoff,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub topic: String,
    pub subject: String,
    pub healthy_interval: Duration,
    pub failure_interval: Duration,
    pub drain_timeout: Duration,
    pub redelivery: RedeliveryPolicy,
}

/// Counts for one polling cycle that ran to the end of its snapshot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub skipped: usize,
    pub published: usize,
    pub redelivered: usize,
}

enum CycleOutcome {
    Completed(CycleReport),
    Interrupted,
}

pub struct IngestionLoop {
    source: Arc<dyn TimelineSource>,
    registry: Arc<dyn SchemaRegistry>,
    publisher: Arc<dyn Publisher>,
    dedup: Deduplicator,
    redelivery: RedeliveryQueue,
    settings: LoopSettings,
    shutdown: CancellationToken,
    liveness: Option<HealthHandle>,
    encoder: Option<SchemaEncoder>,
    state: LoopState,
    startup_error: Option<StartupError>,
    last_cycle: Option<Result<CycleReport, CycleError>>,
}

impl IngestionLoop {
    pub fn new(
        source: Arc<dyn TimelineSource>,
        registry: Arc<dyn SchemaRegistry>,
        publisher: Arc<dyn Publisher>,
        dedup: Deduplicator,
        settings: LoopSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            registry,
            publisher,
            dedup,
            redelivery: RedeliveryQueue::new(settings.redelivery),
            settings,
            shutdown,
            liveness: None,
            encoder: None,
            state: LoopState::Starting,
            startup_error: None,
            last_cycle: None,
        }
    }

    pub fn with_liveness(mut self, liveness: HealthHandle) -> Self {
        self.liveness = Some(liveness);
        self
    }

    /// Start with an encoder bound elsewhere; STARTING then skips schema
    /// registration and only connects the broker and the source.
    pub fn with_encoder(mut self, encoder: SchemaEncoder) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    pub fn pending_redeliveries(&self) -> usize {
        self.redelivery.len()
    }

    /// Outcome of the most recent polling cycle, if one ran.
    pub fn last_cycle(&self) -> Option<&Result<CycleReport, CycleError>> {
        self.last_cycle.as_ref()
    }

    /// Run until stopped by the shutdown token or a startup failure, then
    /// drain the publisher.
    pub async fn run(mut self) -> Result<(), StartupError> {
        while self.step().await != LoopState::Stopped {}

        info!("ingestion loop stopped, draining publisher");
        if let Err(e) = self.publisher.drain(self.settings.drain_timeout).await {
            error!("failed to drain publisher: {}", e);
        }

        match self.startup_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Perform the work of the current state and move to the next one.
    pub async fn step(&mut self) -> LoopState {
        let next = match self.state {
            LoopState::Starting => self.start().await,
            LoopState::Polling => self.poll().await,
            LoopState::Backoff => {
                if self.sleep_or_shutdown(self.settings.failure_interval).await {
                    LoopState::Stopped
                } else {
                    LoopState::Polling
                }
            }
            LoopState::Stopped => LoopState::Stopped,
        };

        if next != self.state {
            debug!(from = ?self.state, to = ?next, "ingestion loop transition");
        }
        self.state = next;
        next
    }

    async fn start(&mut self) -> LoopState {
        if self.shutdown.is_cancelled() {
            return LoopState::Stopped;
        }

        match self.connect_all().await {
            Ok(encoder) => {
                info!(schema_id = %encoder.id(), topic = %self.settings.topic, "ingestion loop started");
                self.encoder = Some(encoder);
                LoopState::Polling
            }
            Err(e) => {
                error!("startup failed: {}", e);
                self.startup_error = Some(e);
                LoopState::Stopped
            }
        }
    }

    async fn connect_all(&self) -> Result<SchemaEncoder, StartupError> {
        let encoder = match &self.encoder {
            Some(encoder) => encoder.clone(),
            None => SchemaEncoder::register(self.registry.as_ref(), &self.settings.subject).await?,
        };
        self.publisher.connect().await?;
        self.source.connect().await?;
        Ok(encoder)
    }

    async fn poll(&mut self) -> LoopState {
        if self.shutdown.is_cancelled() {
            return LoopState::Stopped;
        }
        if let Some(liveness) = &self.liveness {
            liveness.report_healthy().await;
        }
        let Some(encoder) = self.encoder.clone() else {
            return LoopState::Starting;
        };

        match self.poll_cycle(&encoder).await {
            Ok(CycleOutcome::Interrupted) => LoopState::Stopped,
            Ok(CycleOutcome::Completed(report)) => {
                counter!("bluesky_cycles_total", "outcome" => "completed").increment(1);
                gauge!("bluesky_dedup_entries").set(self.dedup.len() as f64);
                info!(
                    fetched = report.fetched,
                    skipped = report.skipped,
                    published = report.published,
                    redelivered = report.redelivered,
                    "polling cycle completed"
                );
                self.last_cycle = Some(Ok(report));

                if self.sleep_or_shutdown(self.settings.healthy_interval).await {
                    LoopState::Stopped
                } else {
                    LoopState::Polling
                }
            }
            Err(e) => {
                counter!("bluesky_cycles_total", "outcome" => "failed").increment(1);
                warn!(
                    uri = e.uri().unwrap_or_default(),
                    error = %e,
                    "polling cycle abandoned, backing off"
                );
                self.last_cycle = Some(Err(e));
                LoopState::Backoff
            }
        }
    }

    async fn poll_cycle(&mut self, encoder: &SchemaEncoder) -> Result<CycleOutcome, CycleError> {
        let mut report = CycleReport {
            redelivered: self.redeliver_pending().await?,
            ..Default::default()
        };

        let feed = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(CycleOutcome::Interrupted),
            feed = self.source.fetch_timeline() => feed?,
        };
        report.fetched = feed.len();
        counter!("bluesky_posts_fetched_total").increment(feed.len() as u64);

        for item in &feed {
            if !self.dedup.check_and_mark(item.uri()) {
                debug!(uri = item.uri(), "skipping duplicate post");
                counter!("bluesky_posts_skipped_total").increment(1);
                report.skipped += 1;
                continue;
            }

            self.process(item, encoder).await?;
            report.published += 1;
        }

        Ok(CycleOutcome::Completed(report))
    }

    async fn process(&mut self, item: &FeedItem, encoder: &SchemaEncoder) -> Result<(), CycleError> {
        let uri = item.uri();
        let message = normalize_item(item);

        let payload = encoder.encode(&message).map_err(|source| {
            counter!("bluesky_posts_dropped_total", "reason" => "encoding").increment(1);
            error!(uri, "dropping post that does not match schema: {}", source);
            CycleError::Encoding {
                uri: uri.to_owned(),
                source,
            }
        })?;

        match self
            .publisher
            .publish(&self.settings.topic, Some(uri), &payload)
            .await
        {
            Ok(()) => {
                counter!("bluesky_posts_published_total").increment(1);
                info!(uri, author = %message.author, "published post");
                Ok(())
            }
            Err(source) => {
                self.keep_for_redelivery(PendingDelivery {
                    uri: uri.to_owned(),
                    payload,
                });
                Err(CycleError::Delivery {
                    uri: uri.to_owned(),
                    source,
                })
            }
        }
    }

    fn keep_for_redelivery(&mut self, delivery: PendingDelivery) {
        if let Some(dropped) = self.redelivery.push(delivery) {
            counter!("bluesky_posts_dropped_total", "reason" => "delivery").increment(1);
            error!(uri = %dropped.uri, "post will not be redelivered by this process");
        }
    }

    /// Publish failed deliveries from earlier cycles, oldest first. Stops at
    /// the first failure, leaving that entry at the front of the queue.
    async fn redeliver_pending(&mut self) -> Result<usize, CycleError> {
        let mut redelivered = 0;

        while let Some(pending) = self.redelivery.pop() {
            match self
                .publisher
                .publish(&self.settings.topic, Some(&pending.uri), &pending.payload)
                .await
            {
                Ok(()) => {
                    counter!("bluesky_posts_published_total").increment(1);
                    info!(uri = %pending.uri, "redelivered post");
                    redelivered += 1;
                }
                Err(source) => {
                    let uri = pending.uri.clone();
                    self.redelivery.requeue_front(pending);
                    return Err(CycleError::Delivery { uri, source });
                }
            }
        }

        Ok(redelivered)
    }

    /// Returns `true` when shutdown was requested before the sleep elapsed.
    async fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}
