//! MCP transport layer.
//!
//! Each remote MCP server is reached over one transport:
//! - **Streamable HTTP**: one POST per JSON-RPC message; the reply is either
//!   a JSON body or a short event stream.
//! - **Sse**: a long-lived GET event stream carries replies, requests are
//!   POSTed to the endpoint the server announces on that stream.
//!
//! Constructors never touch the network; the first request does.

mod event_stream;
mod http;
mod sse;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde_json::Value;

use tether_domain::config::{McpTransportConfig, McpTransportKind};

use crate::error::{kind_from_status, McpError, McpErrorKind};
use crate::protocol::JsonRpcResponse;

pub use event_stream::{SseDecoder, SseEvent};
pub use http::StreamableHttpTransport;
pub use sse::SseTransport;

/// Trait for MCP server transports.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the corresponding response.
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError>;

    /// Send a JSON-RPC notification (no response expected).
    async fn send_notification(&self, method: &str) -> Result<(), TransportError>;

    /// Check if the transport is still usable.
    fn is_alive(&self) -> bool;

    /// Shut down the transport gracefully.
    async fn shutdown(&self);
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport connection closed")]
    Closed,

    #[error("timeout waiting for response")]
    Timeout,

    #[error("stream ended without a response to request {0}")]
    NoResponse(u64),

    #[error("invalid transport config: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    /// Kind this error maps to, when it can be told without the source chain.
    pub(crate) fn error_kind(&self) -> Option<McpErrorKind> {
        match self {
            TransportError::Http(_) => None,
            TransportError::Status { status, .. } => Some(kind_from_status(*status)),
            TransportError::Json(_) | TransportError::NoResponse(_) => Some(McpErrorKind::Server),
            TransportError::Closed => Some(McpErrorKind::Connection),
            TransportError::Timeout => Some(McpErrorKind::Timeout),
            TransportError::InvalidConfig(_) => Some(McpErrorKind::InvalidRequest),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Builds transports from server descriptors, sharing one HTTP connection pool.
#[derive(Debug, Clone)]
pub struct TransportBuilder {
    http: reqwest::Client,
    request_timeout: Duration,
}

impl TransportBuilder {
    pub fn new(request_timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), request_timeout)
    }

    pub fn with_client(http: reqwest::Client, request_timeout: Duration) -> Self {
        Self {
            http,
            request_timeout,
        }
    }

    /// Reject descriptors that can never connect. Not retryable.
    pub fn validate(&self, config: &McpTransportConfig) -> Result<(), McpError> {
        if config.kind == McpTransportKind::Unsupported {
            return Err(unsupported_kind(config));
        }
        parse_target(config).map(|_| ())
    }

    pub fn build(&self, config: &McpTransportConfig) -> Result<Box<dyn McpTransport>, McpError> {
        let (url, headers) = parse_target(config)?;
        let http = self.http.clone();

        let transport: Box<dyn McpTransport> = match config.kind {
            McpTransportKind::StreamableHttp => Box::new(StreamableHttpTransport::new(
                http,
                url,
                headers,
                self.request_timeout,
            )),
            McpTransportKind::Sse => {
                Box::new(SseTransport::new(http, url, headers, self.request_timeout))
            }
            McpTransportKind::Unsupported => return Err(unsupported_kind(config)),
        };
        Ok(transport)
    }
}

fn unsupported_kind(config: &McpTransportConfig) -> McpError {
    McpError::invalid_request(format!(
        "unsupported MCP transport kind for '{}'",
        config.url
    ))
    .with_context("url", config.url.as_str())
}

fn parse_target(config: &McpTransportConfig) -> Result<(Url, HeaderMap), McpError> {
    let url = Url::parse(&config.url).map_err(|e| {
        McpError::invalid_request(format!("invalid MCP server url '{}': {e}", config.url))
            .with_cause(e)
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(McpError::invalid_request(format!(
            "MCP server url '{}' must use http or https",
            config.url
        )));
    }

    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            McpError::invalid_request(format!("invalid header name '{name}': {e}"))
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            McpError::invalid_request(format!("invalid value for header '{name}': {e}"))
        })?;
        headers.insert(header_name, header_value);
    }

    Ok((url, headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> TransportBuilder {
        TransportBuilder::new(Duration::from_secs(5))
    }

    #[test]
    fn builds_both_kinds_without_network() {
        let sse = McpTransportConfig::sse("http://x/mcp").with_header("X-Api-Key", "k");
        let http = McpTransportConfig::streamable_http("https://tools.example.com/mcp");
        assert!(builder().build(&sse).unwrap().is_alive());
        assert!(builder().build(&http).unwrap().is_alive());
    }

    #[test]
    fn unsupported_kind_fails_fast() {
        let mut cfg = McpTransportConfig::sse("http://x/mcp");
        cfg.kind = McpTransportKind::Unsupported;
        let err = builder().validate(&cfg).unwrap_err();
        assert_eq!(err.kind(), McpErrorKind::InvalidRequest);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn build_refuses_unsupported_kind() {
        let mut cfg = McpTransportConfig::sse("http://x/mcp");
        cfg.kind = McpTransportKind::Unsupported;
        let err = builder().build(&cfg).err().unwrap();
        assert_eq!(err.kind(), McpErrorKind::InvalidRequest);
        assert_eq!(err.context()["url"], "http://x/mcp");
    }

    #[test]
    fn bad_urls_and_headers_are_invalid_requests() {
        for cfg in [
            McpTransportConfig::sse("not a url"),
            McpTransportConfig::sse("ftp://x/mcp"),
            McpTransportConfig::sse("http://x/mcp").with_header("bad header", "v"),
            McpTransportConfig::sse("http://x/mcp").with_header("X-Ok", "line\nbreak"),
        ] {
            let err = builder().validate(&cfg).unwrap_err();
            assert_eq!(err.kind(), McpErrorKind::InvalidRequest, "{cfg:?}");
        }
    }

    #[test]
    fn transport_errors_classify() {
        let status = TransportError::Status {
            status: 502,
            body: "bad gateway".into(),
        };
        assert_eq!(McpError::from(status).kind(), McpErrorKind::Server);
        assert_eq!(McpError::from(TransportError::Closed).kind(), McpErrorKind::Connection);
        assert_eq!(McpError::from(TransportError::Timeout).kind(), McpErrorKind::Timeout);
    }
}
