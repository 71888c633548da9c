//! MCP client manager: creates, caches, health-checks and closes one client
//! per configured server.
//!
//! Every server id owns a slot. The slot's async `decision` lock serializes
//! "inspect entry, maybe close it, maybe create a new one"; the entry itself
//! sits behind a short synchronous lock so state queries never wait on I/O.
//! A new entry's client future is installed before anything polls it, so
//! concurrent callers for the same id share one connection attempt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use tether_domain::config::{McpConfig, McpLifecycleConfig, McpServerConfig, McpTransportKind};
use tether_domain::trace::TraceEvent;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerSettings, CircuitState};
use crate::client::{Connector, JsonRpcConnector, McpClient};
use crate::error::McpError;
use crate::health::{Health, HealthMonitor, HealthStatus};
use crate::protocol::{McpToolDef, ToolCallResult};
use crate::retry::RetryExecutor;
use crate::signature::signature;
use crate::transport::TransportBuilder;

/// Connection attempt shared by every caller waiting on the same entry.
pub type ClientFuture = Shared<BoxFuture<'static, Result<Arc<dyn McpClient>, McpError>>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientState {
    Connecting,
    Ready,
    Idle,
    Degraded,
    Closing,
    Closed,
    Error,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientState::Connecting => "CONNECTING",
            ClientState::Ready => "READY",
            ClientState::Idle => "IDLE",
            ClientState::Degraded => "DEGRADED",
            ClientState::Closing => "CLOSING",
            ClientState::Closed => "CLOSED",
            ClientState::Error => "ERROR",
        }
    }

    pub fn can_transition_to(self, to: ClientState) -> bool {
        use ClientState::*;
        match self {
            Connecting => matches!(to, Ready | Error | Closing),
            Ready => matches!(to, Ready | Idle | Degraded | Error | Closing),
            Idle => matches!(to, Ready | Degraded | Error | Closing),
            Degraded => matches!(to, Ready | Degraded | Error | Closing),
            Error => matches!(to, Ready | Error | Closing),
            Closing => to == Closed,
            Closed => false,
        }
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub max_client_age: Duration,
    pub max_idle_time: Duration,
    pub health_check_interval: Duration,
    pub health_probe_timeout: Duration,
    pub close_timeout: Duration,
    pub request_timeout: Duration,
    pub circuit_breaker: CircuitBreakerSettings,
    pub retry: RetryExecutor,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from(&McpLifecycleConfig::default())
    }
}

impl From<&McpLifecycleConfig> for ManagerSettings {
    fn from(cfg: &McpLifecycleConfig) -> Self {
        Self {
            max_client_age: Duration::from_millis(cfg.max_client_age_ms),
            max_idle_time: Duration::from_millis(cfg.max_idle_time_ms),
            health_check_interval: Duration::from_millis(cfg.health_check_interval_ms),
            health_probe_timeout: Duration::from_millis(cfg.health_probe_timeout_ms),
            close_timeout: Duration::from_millis(cfg.close_timeout_ms),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
            circuit_breaker: CircuitBreakerSettings::from(&cfg.circuit_breaker),
            retry: RetryExecutor::from_config(&cfg.retry),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entries and slots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ManagedClientEntry {
    /// Identifies this incarnation; late completions for older ones are dropped.
    generation: u64,
    client: ClientFuture,
    state: ClientState,
    signature: String,
    transport: McpTransportKind,
    created_at: Instant,
    last_used_at: Instant,
    last_health_check: Option<Instant>,
    circuit_breaker: Arc<CircuitBreaker>,
    error_count: u32,
}

impl ManagedClientEntry {
    fn set_state(&mut self, server_id: &str, to: ClientState) -> bool {
        if !self.state.can_transition_to(to) {
            tracing::warn!(
                server_id = %server_id,
                from = %self.state,
                to = %to,
                "rejected MCP client state transition"
            );
            return false;
        }
        if self.state != to {
            tracing::debug!(server_id = %server_id, from = %self.state, to = %to, "MCP client state");
        }
        self.state = to;
        true
    }
}

#[derive(Default)]
struct SlotState {
    entry: Option<ManagedClientEntry>,
    /// Breaker outlives entries while the descriptor signature is unchanged.
    breaker: Option<(String, Arc<CircuitBreaker>)>,
}

#[derive(Default)]
struct ServerSlot {
    decision: tokio::sync::Mutex<()>,
    inner: Mutex<SlotState>,
}

impl ServerSlot {
    fn entry_matching<R>(&self, generation: u64, f: impl FnOnce(&mut ManagedClientEntry) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        inner
            .entry
            .as_mut()
            .filter(|e| e.generation == generation)
            .map(f)
    }
}

/// What a caller needs to finish a `get_client` outside the decision lock.
struct Lease {
    generation: u64,
    client: ClientFuture,
    breaker: Arc<CircuitBreaker>,
}

/// What a lease is taken for. Decides who reports success to the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseUse {
    /// The caller only wants the client; a resolved client is the success.
    Client,
    /// The caller runs one RPC under the breaker and records that instead.
    ToolCall,
}

/// Serializable view of one managed client.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub server_id: String,
    pub state: ClientState,
    pub transport: McpTransportKind,
    pub error_count: u32,
    pub circuit: CircuitState,
    pub age_ms: u64,
    pub idle_ms: u64,
    pub health: Option<Health>,
    pub last_health_check_at: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ClientManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ClientManager {
    settings: ManagerSettings,
    connector: Arc<dyn Connector>,
    transports: TransportBuilder,
    health: HealthMonitor,
    slots: Mutex<HashMap<String, Arc<ServerSlot>>>,
    configured: Vec<McpServerConfig>,
    next_generation: AtomicU64,
}

impl ClientManager {
    pub fn new(settings: ManagerSettings, connector: Arc<dyn Connector>) -> Self {
        let transports = TransportBuilder::new(settings.request_timeout);
        Self::with_transports(settings, connector, transports)
    }

    /// Use a caller-supplied transport builder (shared HTTP pool, proxies).
    pub fn with_transports(
        settings: ManagerSettings,
        connector: Arc<dyn Connector>,
        transports: TransportBuilder,
    ) -> Self {
        Self {
            settings,
            connector,
            transports,
            health: HealthMonitor::new(),
            slots: Mutex::new(HashMap::new()),
            configured: Vec::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Validate `config` and build a manager using the JSON-RPC connector.
    ///
    /// Nothing connects yet; call [`ClientManager::warm_up`] or let the first
    /// `get_client` do it.
    pub fn from_config(config: &McpConfig) -> tether_domain::error::Result<Self> {
        let issues = config.validation_errors();
        if !issues.is_empty() {
            let joined = issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(tether_domain::error::Error::Config(joined));
        }

        let mut manager = Self::new(
            ManagerSettings::from(&config.lifecycle),
            Arc::new(JsonRpcConnector),
        );
        manager.configured = config.servers.clone();
        Ok(manager)
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn configured_servers(&self) -> &[McpServerConfig] {
        &self.configured
    }

    pub fn server(&self, id: &str) -> Option<&McpServerConfig> {
        self.configured.iter().find(|s| s.id == id)
    }

    /// Connect every configured server concurrently.
    ///
    /// Servers that fail are logged and skipped. Returns how many connected.
    pub async fn warm_up(&self) -> usize {
        let results = join_all(self.configured.iter().map(|cfg| async move {
            tracing::info!(
                server_id = %cfg.id,
                transport = %cfg.transport.kind,
                url = %cfg.transport.url,
                "initializing MCP client"
            );
            match self.get_client(cfg).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(
                        server_id = %cfg.id,
                        code = e.code(),
                        error = %e,
                        "failed to initialize MCP client, skipping"
                    );
                    false
                }
            }
        }))
        .await;

        let ready = results.into_iter().filter(|ok| *ok).count();
        if ready > 0 {
            tracing::info!(count = ready, "MCP client manager ready");
        }
        ready
    }

    // ── get / create ─────────────────────────────────────────────────

    /// Return a ready client for `config`, reusing the cached one when its
    /// descriptor is unchanged and it is not stale.
    pub async fn get_client(&self, config: &McpServerConfig) -> Result<Arc<dyn McpClient>, McpError> {
        let (client, _) = self.acquire(config, LeaseUse::Client).await?;
        Ok(client)
    }

    async fn acquire(
        &self,
        config: &McpServerConfig,
        usage: LeaseUse,
    ) -> Result<(Arc<dyn McpClient>, Lease), McpError> {
        let id = config.id.as_str();
        let signature = signature(config);
        let slot = self.slot(id);

        let lease = {
            let _decision = slot.decision.lock().await;

            let verdict = {
                let inner = slot.inner.lock();
                inner.entry.as_ref().map(|e| {
                    if e.signature != signature {
                        Err("descriptor changed")
                    } else if let Some(reason) = self.stale_reason(e, Instant::now()) {
                        Err(reason)
                    } else {
                        Ok(Lease {
                            generation: e.generation,
                            client: e.client.clone(),
                            breaker: Arc::clone(&e.circuit_breaker),
                        })
                    }
                })
            };

            match verdict {
                Some(Ok(lease)) => {
                    lease.breaker.try_acquire()?;
                    lease
                }
                Some(Err(reason)) => {
                    tracing::debug!(server_id = %id, reason, "replacing MCP client");
                    self.close_slot(id, &slot, reason).await;
                    self.install(config, &slot, signature)?
                }
                None => self.install(config, &slot, signature)?,
            }
        };

        let result = lease.client.clone().await;
        self.settle(id, &slot, &lease, usage, &result);
        result.map(|client| (client, lease))
    }

    /// Install a fresh entry in CONNECTING state. The client future is not
    /// polled here.
    fn install(
        &self,
        config: &McpServerConfig,
        slot: &ServerSlot,
        signature: String,
    ) -> Result<Lease, McpError> {
        let id = config.id.as_str();
        if let Err(e) = self.transports.validate(&config.transport) {
            tracing::warn!(server_id = %id, error = %e, "rejecting MCP server descriptor");
            return Err(e.with_context("server_id", id));
        }

        let mut inner = slot.inner.lock();
        let breaker = match &inner.breaker {
            Some((sig, breaker)) if *sig == signature => Arc::clone(breaker),
            _ => {
                let breaker = Arc::new(CircuitBreaker::new(id, self.settings.circuit_breaker.clone()));
                inner.breaker = Some((signature.clone(), Arc::clone(&breaker)));
                breaker
            }
        };
        breaker.try_acquire()?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let client = self.creation_future(config.clone());
        let now = Instant::now();
        inner.entry = Some(ManagedClientEntry {
            generation,
            client: client.clone(),
            state: ClientState::Connecting,
            signature,
            transport: config.transport.kind,
            created_at: now,
            last_used_at: now,
            last_health_check: None,
            circuit_breaker: Arc::clone(&breaker),
            error_count: 0,
        });
        tracing::debug!(server_id = %id, generation, "creating MCP client");

        Ok(Lease {
            generation,
            client,
            breaker,
        })
    }

    fn creation_future(&self, config: McpServerConfig) -> ClientFuture {
        let connector = Arc::clone(&self.connector);
        let transports = self.transports.clone();
        let retry = self.settings.retry.clone();

        async move {
            retry
                .execute("mcp.connect", || {
                    let connector = Arc::clone(&connector);
                    let transport = transports.build(&config.transport);
                    async move {
                        match transport {
                            Ok(transport) => connector.connect(transport).await,
                            Err(e) => Err(e),
                        }
                    }
                })
                .await
                .map_err(|e| e.with_context("server_id", config.id.as_str()))
        }
        .boxed()
        .shared()
    }

    /// Apply the outcome of awaiting a lease to its entry and breaker.
    ///
    /// Only the first caller to observe a failed creation counts it, so
    /// callers sharing one attempt do not inflate the failure count. A
    /// resolved client only counts as a success for [`LeaseUse::Client`];
    /// tool calls record the outcome of the call itself.
    fn settle(
        &self,
        id: &str,
        slot: &ServerSlot,
        lease: &Lease,
        usage: LeaseUse,
        result: &Result<Arc<dyn McpClient>, McpError>,
    ) {
        let mut inner = slot.inner.lock();
        let Some(entry) = inner
            .entry
            .as_mut()
            .filter(|e| e.generation == lease.generation)
        else {
            return;
        };
        // A close is already tearing this entry down.
        if entry.state == ClientState::Closing {
            return;
        }

        match result {
            Ok(_) => {
                let created = entry.state == ClientState::Connecting;
                entry.error_count = 0;
                entry.last_used_at = Instant::now();
                entry.set_state(id, ClientState::Ready);
                if usage == LeaseUse::Client {
                    lease.breaker.record_success();
                }
                if created {
                    let duration = entry.last_used_at - entry.created_at;
                    tracing::info!(
                        server_id = %id,
                        transport = %entry.transport,
                        duration_ms = duration.as_millis() as u64,
                        "MCP client ready"
                    );
                    TraceEvent::McpClientCreated {
                        server_id: id.to_string(),
                        transport: entry.transport.to_string(),
                        duration_ms: duration.as_millis() as u64,
                    }
                    .emit();
                }
            }
            Err(e) => {
                lease.breaker.record_failure(e);
                if entry.state == ClientState::Connecting {
                    entry.set_state(id, ClientState::Error);
                    inner.entry = None;
                    tracing::warn!(
                        server_id = %id,
                        code = e.code(),
                        recoverable = e.is_recoverable(),
                        error = %e,
                        "MCP client creation failed"
                    );
                    TraceEvent::McpClientCreateFailed {
                        server_id: id.to_string(),
                        code: e.code().to_string(),
                        recoverable: e.is_recoverable(),
                        message: e.to_string(),
                    }
                    .emit();
                } else {
                    entry.error_count = entry.error_count.saturating_add(1);
                    entry.set_state(id, ClientState::Error);
                }
            }
        }
    }

    fn stale_reason(&self, entry: &ManagedClientEntry, now: Instant) -> Option<&'static str> {
        if now.duration_since(entry.created_at) > self.settings.max_client_age {
            Some("max age exceeded")
        } else if now.duration_since(entry.last_used_at) > self.settings.max_idle_time {
            Some("idle timeout")
        } else {
            match entry.state {
                ClientState::Error => Some("error state"),
                ClientState::Degraded => Some("degraded"),
                _ => None,
            }
        }
    }

    // ── close ────────────────────────────────────────────────────────

    /// Close the client for `id`, if any. Idempotent.
    pub async fn close_client(&self, id: &str) {
        let Some(slot) = self.existing_slot(id) else {
            return;
        };
        let _decision = slot.decision.lock().await;
        self.close_slot(id, &slot, "closed by caller").await;
    }

    /// Close every cached client concurrently.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.slots.lock().keys().cloned().collect();
        join_all(ids.iter().map(|id| self.close_client(id))).await;
    }

    /// Caller must hold the slot's decision lock.
    async fn close_slot(&self, id: &str, slot: &ServerSlot, reason: &str) {
        let claimed = {
            let mut inner = slot.inner.lock();
            match inner.entry.as_mut() {
                Some(entry) => {
                    entry.set_state(id, ClientState::Closing);
                    Some((entry.generation, entry.client.clone()))
                }
                None => None,
            }
        };
        let Some((generation, client)) = claimed else {
            return;
        };

        let shutdown = async {
            let resolved = match client.peek() {
                Some(result) => result.clone(),
                None => client.clone().await,
            };
            if let Ok(client) = resolved {
                if let Err(e) = client.notify_shutdown().await {
                    tracing::debug!(server_id = %id, error = %e, "MCP shutdown notification failed");
                }
                if let Err(e) = client.close().await {
                    tracing::debug!(server_id = %id, error = %e, "MCP client close failed");
                }
            }
        };
        if tokio::time::timeout(self.settings.close_timeout, shutdown)
            .await
            .is_err()
        {
            tracing::warn!(
                server_id = %id,
                timeout_ms = self.settings.close_timeout.as_millis() as u64,
                "MCP client did not shut down in time"
            );
        }

        {
            let mut inner = slot.inner.lock();
            if let Some(entry) = inner.entry.as_mut().filter(|e| e.generation == generation) {
                entry.set_state(id, ClientState::Closed);
                inner.entry = None;
            }
        }
        self.health.clear(id);

        tracing::info!(server_id = %id, reason, "MCP client closed");
        TraceEvent::McpClientClosed {
            server_id: id.to_string(),
            reason: reason.to_string(),
        }
        .emit();
    }

    // ── health ───────────────────────────────────────────────────────

    /// Probe the client for `id` unless it was checked recently.
    ///
    /// Success revives DEGRADED or IDLE clients, failure marks them DEGRADED
    /// so the next `get_client` replaces them. Never fails.
    pub async fn perform_health_check(&self, id: &str) {
        let Some(slot) = self.existing_slot(id) else {
            return;
        };

        let claimed = {
            let mut inner = slot.inner.lock();
            let now = Instant::now();
            inner.entry.as_mut().and_then(|entry| {
                let recent = entry
                    .last_health_check
                    .is_some_and(|at| now.duration_since(at) < self.settings.health_check_interval);
                let probeable = matches!(
                    entry.state,
                    ClientState::Ready | ClientState::Idle | ClientState::Degraded
                );
                if recent || !probeable {
                    return None;
                }
                // Creation still in flight: nothing to probe yet.
                let client = entry.client.peek()?.as_ref().ok()?.clone();
                entry.last_health_check = Some(now);
                Some((entry.generation, client))
            })
        };
        let Some((generation, client)) = claimed else {
            return;
        };

        let probe_timeout = self.settings.health_probe_timeout;
        let status = self
            .health
            .check_health(id, async move {
                match tokio::time::timeout(probe_timeout, client.ping()).await {
                    Ok(result) => result,
                    Err(_) => Err(McpError::timeout(format!(
                        "health probe timed out after {}ms",
                        probe_timeout.as_millis()
                    ))),
                }
            })
            .await;

        slot.entry_matching(generation, |entry| {
            if status.is_healthy() {
                if matches!(entry.state, ClientState::Degraded | ClientState::Idle) {
                    entry.set_state(id, ClientState::Ready);
                }
            } else if matches!(
                entry.state,
                ClientState::Ready | ClientState::Idle | ClientState::Degraded
            ) {
                entry.set_state(id, ClientState::Degraded);
            }
        });
    }

    pub fn get_client_state(&self, id: &str) -> Option<ClientState> {
        let slot = self.existing_slot(id)?;
        let inner = slot.inner.lock();
        inner.entry.as_ref().map(|e| e.state)
    }

    pub fn health_status(&self, id: &str) -> Option<HealthStatus> {
        self.health.status(id)
    }

    pub fn circuit_state(&self, id: &str) -> Option<CircuitState> {
        let slot = self.existing_slot(id)?;
        let inner = slot.inner.lock();
        inner.breaker.as_ref().map(|(_, breaker)| breaker.state())
    }

    // ── tool routing ─────────────────────────────────────────────────

    pub async fn list_tools(&self, config: &McpServerConfig) -> Result<Vec<McpToolDef>, McpError> {
        let (client, lease) = self.acquire(config, LeaseUse::ToolCall).await?;
        let result = lease.breaker.execute(client.list_tools()).await;
        self.after_call(&config.id, &lease, &result);
        result
    }

    /// Call `tool` on the server described by `config`.
    ///
    /// A result flagged `isError` by the server is returned as a `Tool` error.
    pub async fn call_tool(
        &self,
        config: &McpServerConfig,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, McpError> {
        let (client, lease) = self.acquire(config, LeaseUse::ToolCall).await?;
        let result = lease
            .breaker
            .execute(async {
                let result = client.call_tool(tool, arguments).await?;
                if result.is_error {
                    return Err(McpError::tool(result.text())
                        .with_context("server_id", config.id.as_str())
                        .with_context("tool", tool));
                }
                Ok(result)
            })
            .await;
        self.after_call(&config.id, &lease, &result);
        result
    }

    fn after_call<T>(&self, id: &str, lease: &Lease, result: &Result<T, McpError>) {
        let Some(slot) = self.existing_slot(id) else {
            return;
        };
        slot.entry_matching(lease.generation, |entry| match result {
            Err(e) if e.should_trip_circuit_breaker() => {
                entry.error_count = entry.error_count.saturating_add(1);
                entry.set_state(id, ClientState::Error);
            }
            _ => {
                entry.last_used_at = Instant::now();
                if entry.state == ClientState::Idle {
                    entry.set_state(id, ClientState::Ready);
                }
            }
        });
    }

    // ── maintenance ──────────────────────────────────────────────────

    /// One pass over all entries: close stale ones, mark long-unused READY
    /// clients IDLE, and health-check the rest.
    pub async fn run_maintenance(&self) {
        let slots: Vec<(String, Arc<ServerSlot>)> = self
            .slots
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        for (id, slot) in slots {
            let stale = {
                let mut inner = slot.inner.lock();
                let now = Instant::now();
                match inner.entry.as_mut() {
                    None => continue,
                    Some(entry) => {
                        if entry.state == ClientState::Ready
                            && now.duration_since(entry.last_used_at) > self.settings.health_check_interval
                        {
                            entry.set_state(&id, ClientState::Idle);
                        }
                        self.stale_reason(entry, now)
                    }
                }
            };

            match stale {
                Some(_) => {
                    let _decision = slot.decision.lock().await;
                    let reason = {
                        let inner = slot.inner.lock();
                        inner
                            .entry
                            .as_ref()
                            .and_then(|e| self.stale_reason(e, Instant::now()))
                    };
                    if let Some(reason) = reason {
                        self.close_slot(&id, &slot, reason).await;
                    }
                }
                None => self.perform_health_check(&id).await,
            }
        }
    }

    /// Run [`ClientManager::run_maintenance`] every `interval` until `cancel`
    /// fires.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => manager.run_maintenance().await,
                }
            }
            tracing::debug!("MCP maintenance loop stopped");
        })
    }

    /// Per-server view, sorted by id.
    pub fn snapshot(&self) -> Vec<ClientSnapshot> {
        let slots: Vec<(String, Arc<ServerSlot>)> = self
            .slots
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();
        let now = Instant::now();

        let mut out: Vec<ClientSnapshot> = slots
            .into_iter()
            .filter_map(|(id, slot)| {
                let inner = slot.inner.lock();
                let entry = inner.entry.as_ref()?;
                let health = self.health.status(&id);
                Some(ClientSnapshot {
                    state: entry.state,
                    transport: entry.transport,
                    error_count: entry.error_count,
                    circuit: entry.circuit_breaker.state(),
                    age_ms: now.duration_since(entry.created_at).as_millis() as u64,
                    idle_ms: now.duration_since(entry.last_used_at).as_millis() as u64,
                    health: health.as_ref().map(|h| h.status),
                    last_health_check_at: health.map(|h| h.checked_at),
                    server_id: id,
                })
            })
            .collect();
        out.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        out
    }

    // ── slots ────────────────────────────────────────────────────────

    fn slot(&self, id: &str) -> Arc<ServerSlot> {
        Arc::clone(self.slots.lock().entry(id.to_string()).or_default())
    }

    fn existing_slot(&self, id: &str) -> Option<Arc<ServerSlot>> {
        self.slots.lock().get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_edges() {
        use ClientState::*;
        assert!(Connecting.can_transition_to(Ready));
        assert!(!Connecting.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Ready));
        assert!(!Error.can_transition_to(Degraded));
        assert!(Closing.can_transition_to(Closed));
        assert!(!Closing.can_transition_to(Ready));
        for to in [Connecting, Ready, Idle, Degraded, Closing, Closed, Error] {
            assert!(!Closed.can_transition_to(to));
        }
    }

    #[test]
    fn settings_follow_lifecycle_config() {
        let settings = ManagerSettings::default();
        assert_eq!(settings.max_client_age, Duration::from_secs(300));
        assert_eq!(settings.max_idle_time, Duration::from_secs(120));
        assert_eq!(settings.health_check_interval, Duration::from_secs(30));
        assert_eq!(settings.circuit_breaker.failure_threshold, 5);
        assert_eq!(settings.retry.strategy().max_attempts(), 3);
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let mut config = McpConfig::default();
        config.lifecycle.circuit_breaker.failure_threshold = 0;
        assert!(matches!(
            ClientManager::from_config(&config),
            Err(tether_domain::error::Error::Config(_))
        ));
    }
}
