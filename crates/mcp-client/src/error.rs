//! Error taxonomy for MCP client operations.
//!
//! Every failure that leaves this crate is an [`McpError`]: a closed set of
//! kinds, each with a fixed recoverability. Raw transport, I/O and HTTP
//! errors are turned into one by [`McpError::classify`], which inspects the
//! whole `source()` chain before falling back to message heuristics.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::protocol::JsonRpcError;
use crate::transport::TransportError;

/// A source error that can be cloned alongside the [`McpError`] carrying it.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum McpErrorKind {
    Connection,
    Timeout,
    Initialization,
    Tool,
    InvalidRequest,
    Server,
    CircuitBreakerOpen,
    Unknown,
}

impl McpErrorKind {
    /// Stable discriminant string.
    pub fn code(self) -> &'static str {
        match self {
            McpErrorKind::Connection => "CONNECTION_ERROR",
            McpErrorKind::Timeout => "TIMEOUT_ERROR",
            McpErrorKind::Initialization => "INITIALIZATION_ERROR",
            McpErrorKind::Tool => "TOOL_ERROR",
            McpErrorKind::InvalidRequest => "INVALID_REQUEST",
            McpErrorKind::Server => "SERVER_ERROR",
            McpErrorKind::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            McpErrorKind::Unknown => "UNKNOWN_ERROR",
        }
    }

    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            McpErrorKind::Connection
                | McpErrorKind::Timeout
                | McpErrorKind::Initialization
                | McpErrorKind::Server
        )
    }

    /// Errors that indicate server degradation rather than a caller bug.
    pub fn trips_circuit_breaker(self) -> bool {
        matches!(
            self,
            McpErrorKind::Connection | McpErrorKind::Server | McpErrorKind::Timeout
        )
    }
}

impl fmt::Display for McpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpError
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A classified MCP failure. Constructed once, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct McpError {
    kind: McpErrorKind,
    message: String,
    cause: Option<SharedError>,
    context: BTreeMap<String, Value>,
}

impl McpError {
    pub fn new(kind: McpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            context: BTreeMap::new(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::Connection, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::Timeout, message)
    }

    pub fn initialization(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::Initialization, message)
    }

    pub fn tool(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::Tool, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::InvalidRequest, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::Server, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::Unknown, message)
    }

    /// Rejection issued by an open circuit breaker.
    pub fn circuit_open(server_id: &str, retry_in: Duration) -> Self {
        Self::new(
            McpErrorKind::CircuitBreakerOpen,
            format!("circuit breaker open for MCP server '{server_id}'"),
        )
        .with_context("server_id", server_id)
        .with_context("retry_in_ms", retry_in.as_millis() as u64)
    }

    pub fn with_cause<E>(self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.with_shared_cause(Arc::new(cause))
    }

    fn with_shared_cause(mut self, cause: SharedError) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> McpErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }

    pub fn should_trip_circuit_breaker(&self) -> bool {
        self.kind.trips_circuit_breaker()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    pub fn cause(&self) -> Option<&SharedError> {
        self.cause.as_ref()
    }

    // ── adapter ─────────────────────────────────────────────────────

    /// Classify any error into an [`McpError`].
    ///
    /// Already-classified errors pass through unchanged. Otherwise the
    /// source chain is searched for a recognisable network or HTTP failure,
    /// then errno-style code tokens and finally message keywords decide the
    /// kind. Anything left over is [`McpErrorKind::Unknown`].
    pub fn classify<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::classify_boxed(Box::new(err))
    }

    pub fn classify_boxed(err: Box<dyn StdError + Send + Sync + 'static>) -> Self {
        match err.downcast::<McpError>() {
            Ok(mcp) => *mcp,
            Err(other) => classify_shared(Arc::from(other)),
        }
    }

    /// Map a JSON-RPC error object returned by a server for `method`.
    pub fn from_rpc_error(err: &JsonRpcError, method: &str) -> Self {
        let kind = match err.code {
            -32700 | -32600 | -32601 | -32602 => McpErrorKind::InvalidRequest,
            -32603 | -32099..=-32000 => McpErrorKind::Server,
            _ => kind_from_message(&err.message.to_lowercase()).unwrap_or(match method {
                "tools/call" => McpErrorKind::Tool,
                "initialize" => McpErrorKind::Initialization,
                _ => McpErrorKind::Unknown,
            }),
        };

        let mut mcp = McpError::new(kind, format!("{method} failed: {}", err.message))
            .with_context("method", method)
            .with_context("rpc_code", err.code);
        if let Some(data) = &err.data {
            mcp = mcp.with_context("rpc_data", data.clone());
        }
        mcp.with_cause(err.clone())
    }
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for McpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<TransportError> for McpError {
    fn from(e: TransportError) -> Self {
        McpError::classify(e)
    }
}

impl From<McpError> for tether_domain::error::Error {
    fn from(e: McpError) -> Self {
        tether_domain::error::Error::Mcp {
            code: e.code().to_string(),
            message: e.message,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const CONNECTION_CODES: &[&str] = &[
    "ECONNREFUSED",
    "ECONNRESET",
    "ECONNABORTED",
    "EHOSTUNREACH",
    "ENETUNREACH",
    "ENOTFOUND",
    "EAI_AGAIN",
    "EPIPE",
];

const TIMEOUT_CODES: &[&str] = &["ETIMEDOUT", "ESOCKETTIMEDOUT"];

fn classify_shared(cause: SharedError) -> McpError {
    let message = render_chain(&*cause);
    let kind = kind_from_chain(&*cause)
        .or_else(|| kind_from_code_token(&message))
        .or_else(|| kind_from_message(&message.to_lowercase()))
        .unwrap_or(McpErrorKind::Unknown);

    McpError::new(kind, message).with_shared_cause(cause)
}

/// `outer: inner: innermost`, skipping sources already spelled out.
fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        let text = source.to_string();
        if !text.is_empty() && !rendered.contains(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        current = source.source();
    }
    rendered
}

fn kind_from_chain(err: &(dyn StdError + 'static)) -> Option<McpErrorKind> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(mcp) = e.downcast_ref::<McpError>() {
            return Some(mcp.kind);
        }
        if let Some(transport) = e.downcast_ref::<TransportError>() {
            if let Some(kind) = transport.error_kind() {
                return Some(kind);
            }
        }
        if let Some(http) = e.downcast_ref::<reqwest::Error>() {
            if let Some(kind) = kind_from_reqwest(http) {
                return Some(kind);
            }
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if let Some(kind) = kind_from_io(io.kind()) {
                return Some(kind);
            }
            // `io::Error::source` skips the wrapped error itself.
            if let Some(kind) = io.get_ref().and_then(|inner| kind_from_chain(inner)) {
                return Some(kind);
            }
        }
        current = e.source();
    }
    None
}

pub(crate) fn kind_from_io(kind: std::io::ErrorKind) -> Option<McpErrorKind> {
    use std::io::ErrorKind;
    match kind {
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe
        | ErrorKind::AddrNotAvailable
        | ErrorKind::UnexpectedEof => Some(McpErrorKind::Connection),
        ErrorKind::TimedOut => Some(McpErrorKind::Timeout),
        _ => None,
    }
}

fn kind_from_reqwest(err: &reqwest::Error) -> Option<McpErrorKind> {
    if err.is_timeout() {
        return Some(McpErrorKind::Timeout);
    }
    if err.is_connect() {
        return Some(McpErrorKind::Connection);
    }
    err.status().map(|s| kind_from_status(s.as_u16()))
}

pub(crate) fn kind_from_status(status: u16) -> McpErrorKind {
    match status {
        408 | 504 => McpErrorKind::Timeout,
        500..=599 => McpErrorKind::Server,
        400..=499 => McpErrorKind::InvalidRequest,
        _ => McpErrorKind::Unknown,
    }
}

fn kind_from_code_token(message: &str) -> Option<McpErrorKind> {
    if TIMEOUT_CODES.iter().any(|code| message.contains(code)) {
        return Some(McpErrorKind::Timeout);
    }
    if CONNECTION_CODES.iter().any(|code| message.contains(code)) {
        return Some(McpErrorKind::Connection);
    }
    None
}

/// Keyword heuristics over an already lower-cased message.
fn kind_from_message(lower: &str) -> Option<McpErrorKind> {
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["already initialized", "client already", "connection already"]) {
        Some(McpErrorKind::Initialization)
    } else if has(&["timeout", "timed out"]) {
        Some(McpErrorKind::Timeout)
    } else if has(&["connection", "connect", "network"]) {
        Some(McpErrorKind::Connection)
    } else if has(&["invalid request", "bad request", "malformed"]) {
        Some(McpErrorKind::InvalidRequest)
    } else if has(&["server error", "internal error"]) {
        Some(McpErrorKind::Server)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct Plain(String);

    fn plain(msg: &str) -> McpError {
        McpError::classify(Plain(msg.into()))
    }

    #[test]
    fn connection_refused_is_recoverable_connection_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = McpError::classify(io);
        assert_eq!(err.kind(), McpErrorKind::Connection);
        assert_eq!(err.code(), "CONNECTION_ERROR");
        assert!(err.is_recoverable());
        assert!(err.should_trip_circuit_breaker());
        assert!(err.cause().is_some());
    }

    #[test]
    fn invalid_request_message_is_not_recoverable() {
        let err = plain("Invalid request: missing method");
        assert_eq!(err.kind(), McpErrorKind::InvalidRequest);
        assert!(!err.is_recoverable());
        assert!(!err.should_trip_circuit_breaker());
    }

    #[test]
    fn classified_errors_pass_through() {
        let original = McpError::tool("boom").with_context("tool", "read_file");
        let again = McpError::classify(original.clone());
        assert_eq!(again.kind(), McpErrorKind::Tool);
        assert_eq!(again.message(), "boom");
        assert_eq!(again.context().get("tool"), Some(&Value::from("read_file")));
        assert!(again.cause().is_none());
    }

    #[test]
    fn io_error_nested_in_source_chain_is_found() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline");
        let outer = std::io::Error::new(std::io::ErrorKind::Other, io);
        assert_eq!(McpError::classify(outer).kind(), McpErrorKind::Timeout);
    }

    #[test]
    fn errno_tokens_map_by_code() {
        assert_eq!(plain("connect ECONNREFUSED 127.0.0.1:3000").kind(), McpErrorKind::Connection);
        assert_eq!(plain("getaddrinfo ENOTFOUND x").kind(), McpErrorKind::Connection);
        assert_eq!(plain("read ETIMEDOUT").kind(), McpErrorKind::Timeout);
    }

    #[test]
    fn message_heuristics_follow_priority() {
        assert_eq!(plain("Client already connected").kind(), McpErrorKind::Initialization);
        assert_eq!(plain("request timed out").kind(), McpErrorKind::Timeout);
        assert_eq!(plain("Network is unreachable").kind(), McpErrorKind::Connection);
        assert_eq!(plain("malformed frame").kind(), McpErrorKind::InvalidRequest);
        assert_eq!(plain("Internal error in handler").kind(), McpErrorKind::Server);
        // Initialization wins over the connection keyword.
        assert_eq!(plain("connection already initialized").kind(), McpErrorKind::Initialization);
    }

    #[test]
    fn unmatched_errors_are_unknown_and_final() {
        let err = plain("something odd happened");
        assert_eq!(err.kind(), McpErrorKind::Unknown);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn recoverability_per_kind() {
        use McpErrorKind::*;
        for kind in [Connection, Timeout, Initialization, Server] {
            assert!(kind.is_recoverable(), "{kind} should be recoverable");
        }
        for kind in [Tool, InvalidRequest, CircuitBreakerOpen, Unknown] {
            assert!(!kind.is_recoverable(), "{kind} should not be recoverable");
        }
    }

    #[test]
    fn circuit_open_carries_context() {
        let err = McpError::circuit_open("weather", Duration::from_secs(12));
        assert_eq!(err.code(), "CIRCUIT_BREAKER_OPEN");
        assert!(!err.is_recoverable());
        assert!(!err.should_trip_circuit_breaker());
        assert_eq!(err.context()["retry_in_ms"], Value::from(12_000u64));
        assert!(err.to_string().contains("circuit breaker open"));
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(kind_from_status(503), McpErrorKind::Server);
        assert_eq!(kind_from_status(504), McpErrorKind::Timeout);
        assert_eq!(kind_from_status(404), McpErrorKind::InvalidRequest);
    }

    #[test]
    fn rpc_errors_map_by_code_then_method() {
        let rpc = |code, message: &str| JsonRpcError {
            code,
            message: message.into(),
            data: None,
        };
        let invalid = McpError::from_rpc_error(&rpc(-32602, "bad params"), "tools/call");
        assert_eq!(invalid.kind(), McpErrorKind::InvalidRequest);
        assert_eq!(invalid.context()["rpc_code"], Value::from(-32602));

        let internal = McpError::from_rpc_error(&rpc(-32603, "oops"), "tools/list");
        assert_eq!(internal.kind(), McpErrorKind::Server);

        let tool = McpError::from_rpc_error(&rpc(1, "file not found"), "tools/call");
        assert_eq!(tool.kind(), McpErrorKind::Tool);

        let init = McpError::from_rpc_error(&rpc(7, "unsupported version"), "initialize");
        assert_eq!(init.kind(), McpErrorKind::Initialization);
    }

    #[test]
    fn converts_into_domain_error() {
        let err: tether_domain::error::Error = McpError::server("upstream 502").into();
        assert_eq!(err.to_string(), "MCP SERVER_ERROR: upstream 502");
    }
}
