//! Last known health per client id.
//!
//! Health is advisory: the monitor records probe outcomes and never closes
//! or recreates a client itself.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;

use tether_domain::trace::TraceEvent;

use crate::error::McpError;

/// Default age after which a recorded status no longer counts.
pub const DEFAULT_HEALTH_MAX_AGE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub status: Health,
    pub last_check: Instant,
    pub checked_at: DateTime<Utc>,
    pub latency: Option<Duration>,
    pub error: Option<McpError>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == Health::Healthy
    }
}

#[derive(Debug, Default)]
pub struct HealthMonitor {
    statuses: RwLock<HashMap<String, HealthStatus>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `probe`, record the outcome for `id`, and return it.
    pub async fn check_health<Fut>(&self, id: &str, probe: Fut) -> HealthStatus
    where
        Fut: Future<Output = Result<(), McpError>>,
    {
        let started = Instant::now();
        let outcome = probe.await;
        let finished = Instant::now();

        let status = match outcome {
            Ok(()) => HealthStatus {
                status: Health::Healthy,
                last_check: finished,
                checked_at: Utc::now(),
                latency: Some(finished - started),
                error: None,
            },
            Err(e) => {
                tracing::warn!(server_id = %id, code = e.code(), error = %e, "MCP health probe failed");
                HealthStatus {
                    status: Health::Unhealthy,
                    last_check: finished,
                    checked_at: Utc::now(),
                    latency: None,
                    error: Some(e),
                }
            }
        };

        TraceEvent::McpHealthChecked {
            server_id: id.to_string(),
            healthy: status.is_healthy(),
            latency_ms: status.latency.map(|d| d.as_millis() as u64),
        }
        .emit();

        self.statuses.write().insert(id.to_string(), status.clone());
        status
    }

    pub fn status(&self, id: &str) -> Option<HealthStatus> {
        self.statuses.read().get(id).cloned()
    }

    /// True when `id` has no record or its last check is older than `max_age`.
    pub fn is_health_status_stale(&self, id: &str, max_age: Duration) -> bool {
        match self.statuses.read().get(id) {
            Some(status) => status.last_check.elapsed() > max_age,
            None => true,
        }
    }

    pub fn clear(&self, id: &str) {
        self.statuses.write().remove(id);
    }
}
