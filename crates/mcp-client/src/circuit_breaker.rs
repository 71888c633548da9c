//! Per-server circuit breaker.
//!
//! CLOSED counts qualifying failures and opens at `failure_threshold`.
//! OPEN rejects every call until `reset_timeout` has passed, then lets calls
//! through as HALF_OPEN. HALF_OPEN closes after `success_threshold`
//! successes and reopens on the first qualifying failure.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use tether_domain::config::CircuitBreakerConfig;
use tether_domain::trace::TraceEvent;

use crate::error::McpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

impl From<&CircuitBreakerConfig> for CircuitBreakerSettings {
    fn from(cfg: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold.max(1),
            reset_timeout: Duration::from_millis(cfg.reset_timeout_ms),
            success_threshold: cfg.success_threshold.max(1),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: CircuitBreakerSettings,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: CircuitBreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                next_attempt_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Admit or reject a call. An elapsed OPEN circuit moves to HALF_OPEN.
    pub fn try_acquire(&self) -> Result<(), McpError> {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let now = Instant::now();
        match inner.next_attempt_at {
            Some(at) if now < at => Err(McpError::circuit_open(&self.name, at - now)),
            _ => {
                inner.success_count = 0;
                self.transition(&mut inner, CircuitState::HalfOpen);
                Ok(())
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.success_count += 1;
            if inner.success_count >= self.settings.success_threshold {
                inner.success_count = 0;
                inner.next_attempt_at = None;
                self.transition(&mut inner, CircuitState::Closed);
            }
        }
    }

    /// Count a failure. Errors that do not indicate server trouble are ignored.
    pub fn record_failure(&self, error: &McpError) {
        if !error.should_trip_circuit_breaker() {
            return;
        }

        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.settings.failure_threshold => {
                self.open(&mut inner);
            }
            CircuitState::HalfOpen => self.open(&mut inner),
            _ => {}
        }
    }

    /// Run `fut` under the breaker: reject fast when open, otherwise record
    /// its outcome.
    pub async fn execute<T, Fut>(&self, fut: Fut) -> Result<T, McpError>
    where
        Fut: Future<Output = Result<T, McpError>>,
    {
        self.try_acquire()?;
        match fut.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    fn open(&self, inner: &mut BreakerState) {
        inner.success_count = 0;
        inner.next_attempt_at = Some(Instant::now() + self.settings.reset_timeout);
        self.transition(inner, CircuitState::Open);
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;

        if to == CircuitState::Open {
            tracing::warn!(
                server_id = %self.name,
                from = %from,
                failure_count = inner.failure_count,
                "circuit breaker opened"
            );
        } else {
            tracing::info!(server_id = %self.name, from = %from, to = %to, "circuit breaker transition");
        }

        TraceEvent::McpCircuitTransition {
            server_id: self.name.clone(),
            from: from.as_str().into(),
            to: to.as_str().into(),
            failure_count: inner.failure_count,
        }
        .emit();
    }
}
