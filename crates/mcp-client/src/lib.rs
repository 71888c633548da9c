//! `tether-mcp-client`: resilient lifecycle management for remote MCP
//! (Model Context Protocol) tool servers.
//!
//! This crate provides:
//! - An error taxonomy that classifies any failure as recoverable or not.
//! - A retry executor with pluggable strategies and a per-server circuit breaker.
//! - A health monitor recording the last probe outcome per server.
//! - A [`ClientManager`] that creates, caches, health-checks and closes one
//!   client per server descriptor.
//! - A default JSON-RPC client over SSE and streamable HTTP transports.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tether_mcp_client::{ClientManager, McpConfig};
//!
//! let config = McpConfig::load("mcp.toml")?;
//! let manager = ClientManager::from_config(&config)?;
//!
//! let weather = manager.server("weather").unwrap();
//! for tool in manager.list_tools(weather).await? {
//!     println!("mcp:{}:{}", weather.id, tool.name);
//! }
//!
//! let result = manager
//!     .call_tool(weather, "forecast", json!({ "city": "Lyon" }))
//!     .await?;
//! manager.close_all().await;
//! ```

pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod protocol;
pub mod retry;
pub mod signature;
pub mod transport;

// Re-exports for convenience.
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSettings, CircuitState};
pub use client::{Connector, JsonRpcClient, JsonRpcConnector, McpClient};
pub use config::{McpConfig, McpServerConfig, McpTransportConfig, McpTransportKind};
pub use error::{McpError, McpErrorKind};
pub use health::{Health, HealthMonitor, HealthStatus};
pub use manager::{ClientManager, ClientSnapshot, ClientState, ManagerSettings};
pub use protocol::{McpToolDef, ToolCallResult};
pub use retry::{ExponentialBackoff, FixedDelay, NoRetry, RetryExecutor, RetryStrategy};
pub use transport::{McpTransport, TransportBuilder, TransportError};
