//! Streamable HTTP transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;

use super::event_stream::{response_for, SseDecoder};
use super::{McpTransport, TransportError};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

const SESSION_HEADER: &str = "mcp-session-id";

/// One POST per message against a single MCP endpoint.
///
/// The server may assign a session via the `Mcp-Session-Id` header; it is
/// replayed on every later request and released with a DELETE on shutdown.
pub struct StreamableHttpTransport {
    http: reqwest::Client,
    url: Url,
    headers: HeaderMap,
    request_timeout: Duration,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl StreamableHttpTransport {
    pub fn new(http: reqwest::Client, url: Url, headers: HeaderMap, request_timeout: Duration) -> Self {
        Self {
            http,
            url,
            headers,
            request_timeout,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        }
    }

    /// Session assigned by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn post<T: Serialize>(&self, body: &T) -> RequestBuilder {
        let rb = self
            .http
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .timeout(self.request_timeout)
            .json(body);
        self.with_session(rb)
    }

    fn with_session(&self, rb: RequestBuilder) -> RequestBuilder {
        match self.session_id() {
            Some(id) => rb.header(SESSION_HEADER, id),
            None => rb,
        }
    }

    fn remember_session(&self, resp: &Response) {
        if let Some(id) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock() = Some(id.to_string());
        }
    }

    /// Turn a non-2xx reply into an error, dropping an expired session.
    async fn reject(&self, resp: Response) -> TransportError {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND && self.session_id.lock().take().is_some() {
            tracing::debug!(url = %self.url, "MCP session expired");
        }
        let body = resp.text().await.unwrap_or_default();
        TransportError::Status {
            status: status.as_u16(),
            body,
        }
    }
}

fn is_event_stream(resp: &Response) -> bool {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"))
}

async fn read_event_stream(resp: Response, id: u64) -> Result<JsonRpcResponse, TransportError> {
    let mut stream = Box::pin(resp.bytes_stream());
    let mut decoder = SseDecoder::default();

    while let Some(chunk) = stream.next().await {
        for event in decoder.feed(&chunk?) {
            if let Some(resp) = response_for(&event, id) {
                return Ok(resp);
            }
        }
    }

    decoder
        .finish()
        .and_then(|event| response_for(&event, id))
        .ok_or(TransportError::NoResponse(id))
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Closed);
        }

        let id = self.next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        tracing::debug!(id, method, url = %self.url, "sending MCP request");

        let resp = self.post(&req).send().await?;
        if !resp.status().is_success() {
            return Err(self.reject(resp).await);
        }
        self.remember_session(&resp);

        if is_event_stream(&resp) {
            read_event_stream(resp, id).await
        } else {
            let body = resp.bytes().await?;
            Ok(serde_json::from_slice(&body)?)
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Closed);
        }

        let notif = JsonRpcNotification::new(method);
        tracing::debug!(method, url = %self.url, "sending MCP notification");

        let resp = self.post(&notif).send().await?;
        if !resp.status().is_success() {
            return Err(self.reject(resp).await);
        }
        self.remember_session(&resp);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);

        let Some(session) = self.session_id.lock().take() else {
            return;
        };
        let result = self
            .http
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session)
            .timeout(self.request_timeout)
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!(url = %self.url, error = %e, "failed to release MCP session");
        }
    }
}
