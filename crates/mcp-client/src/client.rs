//! Client handles and the connector that produces them.
//!
//! The lifecycle manager only depends on the [`Connector`] and [`McpClient`]
//! traits. [`JsonRpcConnector`] is the default implementation: it performs
//! the MCP handshake over a transport and returns a [`JsonRpcClient`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::McpError;
use crate::protocol::{
    self, InitializeResult, McpToolDef, ServerInfo, ToolCallResult, ToolsListResult,
};
use crate::transport::McpTransport;

/// Upper bound on `tools/list` pages, guards against cursor loops.
const MAX_TOOL_PAGES: usize = 64;

/// A connected MCP client.
#[async_trait]
pub trait McpClient: Send + Sync {
    /// All tools the server exposes.
    async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError>;

    /// Invoke a tool by name.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError>;

    /// Lightweight liveness probe.
    async fn ping(&self) -> Result<(), McpError> {
        Ok(())
    }

    /// Tell the server we are going away. Optional.
    async fn notify_shutdown(&self) -> Result<(), McpError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError>;
}

/// Opens a client over an already constructed transport.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, transport: Box<dyn McpTransport>) -> Result<Arc<dyn McpClient>, McpError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON-RPC implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRpcConnector;

#[async_trait]
impl Connector for JsonRpcConnector {
    async fn connect(&self, transport: Box<dyn McpTransport>) -> Result<Arc<dyn McpClient>, McpError> {
        // Step 1: `initialize` request.
        let params = serde_json::to_value(protocol::initialize_params()).map_err(|e| {
            McpError::initialization(format!("failed to serialize initialize params: {e}"))
        })?;
        let result = transport
            .send_request("initialize", Some(params))
            .await?
            .into_result()
            .map_err(|e| McpError::from_rpc_error(&e, "initialize"))?;

        let init = match serde_json::from_value::<InitializeResult>(result) {
            Ok(init) => init,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse initialize result");
                InitializeResult::default()
            }
        };

        // Step 2: `notifications/initialized`.
        transport
            .send_notification("notifications/initialized")
            .await?;

        tracing::debug!(
            server = init.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or("?"),
            protocol_version = %init.protocol_version,
            "MCP session initialized"
        );

        Ok(Arc::new(JsonRpcClient { transport, init }))
    }
}

/// An initialized MCP session over one transport.
pub struct JsonRpcClient {
    transport: Box<dyn McpTransport>,
    init: InitializeResult,
}

impl JsonRpcClient {
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.init.server_info.as_ref()
    }

    pub fn protocol_version(&self) -> &str {
        &self.init.protocol_version
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if !self.transport.is_alive() {
            return Err(McpError::connection("MCP transport is closed").with_context("method", method));
        }
        self.transport
            .send_request(method, params)
            .await?
            .into_result()
            .map_err(|e| McpError::from_rpc_error(&e, method))
    }
}

#[async_trait]
impl McpClient for JsonRpcClient {
    async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.take().map(|c| serde_json::json!({ "cursor": c }));
            let value = self.request("tools/list", params).await?;
            let page: ToolsListResult = serde_json::from_value(value).map_err(|e| {
                McpError::server(format!("failed to parse tools/list result: {e}")).with_cause(e)
            })?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(pages = MAX_TOOL_PAGES, "tools/list pagination cut short");
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments
        });
        let value = self.request("tools/call", Some(params)).await?;
        serde_json::from_value::<ToolCallResult>(value).map_err(|e| {
            McpError::server(format!("failed to parse tools/call result: {e}"))
                .with_context("tool", name)
                .with_cause(e)
        })
    }

    async fn ping(&self) -> Result<(), McpError> {
        self.request("ping", None).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), McpError> {
        self.transport.shutdown().await;
        Ok(())
    }
}
