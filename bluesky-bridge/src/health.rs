//! Liveness tracking for the bridge's long-running loops.
//!
//! The ingestion loop and the Kafka client each register a component with a
//! deadline and must report healthy before it passes. The process is live
//! only while every registered component is within its deadline.

use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::{Duration, OffsetDateTime};
use tokio::runtime;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{:?}", self);
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered, has not reported yet
    Starting,
    HealthyUntil(OffsetDateTime),
    Unhealthy,
    /// Missed its deadline
    Stalled,
}

struct HealthMessage {
    component: String,
    status: ComponentStatus,
}

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    pub async fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc().add(self.deadline),
        ))
        .await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.send(message).await {
            warn!("failed to report health status: {}", err)
        }
    }

    /// Report from a non-async context, such as rdkafka's statistics callback.
    pub fn report_healthy_blocking(&self) {
        let status = ComponentStatus::HealthyUntil(OffsetDateTime::now_utc().add(self.deadline));
        if let Ok(handle) = runtime::Handle::try_current() {
            let this = self.clone();
            handle.spawn(async move { this.report_status(status).await });
        } else if let Err(err) = self.sender.blocking_send(HealthMessage {
            component: self.component.clone(),
            status,
        }) {
            warn!("failed to report health status: {}", err)
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthRegistry {
    /// Must be called from within a tokio runtime: status updates are applied
    /// by a background task.
    pub fn new(name: &str) -> Self {
        let (sender, mut receiver) = mpsc::channel::<HealthMessage>(16);
        let components: Arc<RwLock<HashMap<String, ComponentStatus>>> = Default::default();

        let writer = components.clone();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match writer.write() {
                    Ok(mut map) => {
                        map.insert(message.component, message.status);
                    }
                    Err(_) => warn!("poisoned HealthRegistry lock"),
                }
            }
        });

        Self {
            name: name.to_owned(),
            components,
            sender,
        }
    }

    pub async fn register(&self, component: &str, deadline: std::time::Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline: Duration::try_from(deadline).unwrap_or(Duration::MAX),
            sender: self.sender.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// Healthy when at least one component registered and all of them are
    /// within their deadline. Usable directly as an axum handler result.
    pub fn get_status(&self) -> HealthStatus {
        let Ok(components) = self.components.read() else {
            warn!("poisoned HealthRegistry lock");
            return HealthStatus::default();
        };

        let now = OffsetDateTime::now_utc();
        let mut status = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };

        for (name, component) in components.iter() {
            let effective = match component {
                ComponentStatus::HealthyUntil(until) if *until > now => component.clone(),
                ComponentStatus::HealthyUntil(_) => ComponentStatus::Stalled,
                other => other.clone(),
            };
            if !matches!(effective, ComponentStatus::HealthyUntil(_)) {
                status.healthy = false;
            }
            status.components.insert(name.clone(), effective);
        }

        if !status.healthy {
            warn!("{} health check failed: {:?}", self.name, status.components);
        }
        status
    }
}
