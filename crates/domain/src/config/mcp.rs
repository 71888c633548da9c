//! MCP (Model Context Protocol) configuration types for the domain layer.
//!
//! These are lightweight config structs used to deserialize the MCP
//! section of an application config. The actual lifecycle logic lives in
//! the `tether-mcp-client` crate.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::{ConfigError, ConfigSeverity};

/// Top-level MCP configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    /// List of MCP server definitions.
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,

    /// Cache, retry, circuit-breaker and health-check tuning.
    #[serde(default)]
    pub lifecycle: McpLifecycleConfig,
}

/// Declarative descriptor of a single remote MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpServerConfig {
    /// Unique identifier for this server; the key of the client cache.
    pub id: String,

    /// Optional human-readable name. Part of the cache signature.
    #[serde(default)]
    pub name: Option<String>,

    /// How to reach the server.
    pub transport: McpTransportConfig,
}

impl McpServerConfig {
    /// Convenience constructor for a server without a display name.
    pub fn new(id: impl Into<String>, transport: McpTransportConfig) -> Self {
        Self {
            id: id.into(),
            name: None,
            transport,
        }
    }
}

/// Transport section of a server descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpTransportConfig {
    pub kind: McpTransportKind,

    pub url: String,

    /// Static headers forwarded on every request (e.g. `Authorization`).
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl McpTransportConfig {
    pub fn sse(url: impl Into<String>) -> Self {
        Self {
            kind: McpTransportKind::Sse,
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn streamable_http(url: impl Into<String>) -> Self {
        Self {
            kind: McpTransportKind::StreamableHttp,
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Transport kind for connecting to a remote MCP server.
///
/// Unrecognised kinds deserialize to [`McpTransportKind::Unsupported`] so a
/// single bad entry does not fail the whole config; the client manager
/// rejects it when the server is first requested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum McpTransportKind {
    Sse,
    StreamableHttp,
    #[serde(other)]
    Unsupported,
}

impl McpTransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            McpTransportKind::Sse => "sse",
            McpTransportKind::StreamableHttp => "streamable-http",
            McpTransportKind::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for McpTransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client cache and resilience settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpLifecycleConfig {
    /// Entries older than this are recreated on next use.
    #[serde(default = "d_300000")]
    pub max_client_age_ms: u64,
    /// Entries unused for longer than this are recreated on next use.
    #[serde(default = "d_120000")]
    pub max_idle_time_ms: u64,
    /// Minimum spacing between two health probes of the same client.
    #[serde(default = "d_30000")]
    pub health_check_interval_ms: u64,
    /// Upper bound on a single liveness probe.
    #[serde(default = "d_5000")]
    pub health_probe_timeout_ms: u64,
    /// Upper bound on waiting for an in-flight client while closing it.
    #[serde(default = "d_5000")]
    pub close_timeout_ms: u64,
    /// Per-request timeout used by the HTTP transports.
    #[serde(default = "d_30000")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for McpLifecycleConfig {
    fn default() -> Self {
        Self {
            max_client_age_ms: 300_000,
            max_idle_time_ms: 120_000,
            health_check_interval_ms: 30_000,
            health_probe_timeout_ms: 5_000,
            close_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Circuit breaker thresholds (one breaker per server).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Qualifying failures before the circuit opens.
    #[serde(default = "d_5")]
    pub failure_threshold: u32,
    /// How long the circuit stays open before letting a trial call through.
    #[serde(default = "d_60000")]
    pub reset_timeout_ms: u64,
    /// Successes required in half-open state before closing again.
    #[serde(default = "d_2")]
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            success_threshold: 2,
        }
    }
}

/// Retry strategy used around client creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryConfig {
    /// `min(base * 2^attempt, max)`, optionally scaled into `[50%, 100%]`.
    Exponential {
        #[serde(default = "d_100")]
        base_delay_ms: u64,
        #[serde(default = "d_5000")]
        max_delay_ms: u64,
        #[serde(default = "d_3")]
        max_attempts: u32,
        #[serde(default = "d_true")]
        jitter: bool,
    },
    /// Constant wait between attempts.
    Fixed {
        #[serde(default = "d_1000")]
        delay_ms: u64,
        #[serde(default = "d_3")]
        max_attempts: u32,
    },
    /// Fail on the first error.
    None,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::Exponential {
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            max_attempts: 3,
            jitter: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl McpConfig {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for (i, server) in self.servers.iter().enumerate() {
            if server.id.is_empty() {
                errors.push(ConfigError::error(
                    format!("servers[{i}].id"),
                    "server id must not be empty",
                ));
            } else if !seen.insert(server.id.as_str()) {
                errors.push(ConfigError::error(
                    format!("servers[{i}].id"),
                    format!("duplicate server id '{}'", server.id),
                ));
            }
            if server.transport.url.trim().is_empty() {
                errors.push(ConfigError::error(
                    format!("servers[{i}].transport.url"),
                    "url must not be empty",
                ));
            }
            if server.transport.kind == McpTransportKind::Unsupported {
                errors.push(ConfigError::warning(
                    format!("servers[{i}].transport.kind"),
                    "unsupported transport kind, server will be rejected at connect time",
                ));
            }
        }

        let breaker = &self.lifecycle.circuit_breaker;
        if breaker.failure_threshold == 0 {
            errors.push(ConfigError::error(
                "lifecycle.circuit_breaker.failure_threshold",
                "must be greater than 0",
            ));
        }
        if breaker.success_threshold == 0 {
            errors.push(ConfigError::error(
                "lifecycle.circuit_breaker.success_threshold",
                "must be greater than 0",
            ));
        }

        if let RetryConfig::Exponential {
            base_delay_ms,
            max_delay_ms,
            ..
        } = self.lifecycle.retry
        {
            if max_delay_ms < base_delay_ms {
                errors.push(ConfigError::error(
                    "lifecycle.retry.max_delay_ms",
                    "max_delay_ms must not be smaller than base_delay_ms",
                ));
            }
        }

        if self.lifecycle.max_idle_time_ms > self.lifecycle.max_client_age_ms {
            errors.push(ConfigError::warning(
                "lifecycle.max_idle_time_ms",
                "idle limit exceeds max client age and will never apply",
            ));
        }

        errors
    }

    /// Only the issues with [`ConfigSeverity::Error`].
    pub fn validation_errors(&self) -> Vec<ConfigError> {
        self.validate()
            .into_iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect()
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_2() -> u32 {
    2
}
fn d_3() -> u32 {
    3
}
fn d_5() -> u32 {
    5
}
fn d_100() -> u64 {
    100
}
fn d_1000() -> u64 {
    1_000
}
fn d_5000() -> u64 {
    5_000
}
fn d_30000() -> u64 {
    30_000
}
fn d_60000() -> u64 {
    60_000
}
fn d_120000() -> u64 {
    120_000
}
fn d_300000() -> u64 {
    300_000
}
fn d_true() -> bool {
    true
}
