//! HTTP+SSE transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, OnceCell};
use tokio_util::sync::CancellationToken;

use super::event_stream::{SseDecoder, SseEvent};
use super::{McpTransport, TransportError};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Long-lived event stream plus a POST endpoint announced on it.
///
/// The stream is opened lazily by the first message. A background task
/// routes `message` events to the waiting request by JSON-RPC id; it stops
/// on shutdown, on drop, or when the server closes the stream.
pub struct SseTransport {
    http: reqwest::Client,
    url: Url,
    headers: HeaderMap,
    request_timeout: Duration,
    endpoint: OnceCell<Url>,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl SseTransport {
    pub fn new(http: reqwest::Client, url: Url, headers: HeaderMap, request_timeout: Duration) -> Self {
        Self {
            http,
            url,
            headers,
            request_timeout,
            endpoint: OnceCell::new(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            alive: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn endpoint(&self) -> Result<Url, TransportError> {
        self.endpoint
            .get_or_try_init(|| self.open_stream())
            .await
            .cloned()
    }

    async fn open_stream(&self) -> Result<Url, TransportError> {
        tracing::debug!(url = %self.url, "opening MCP SSE stream");

        let resp = self
            .http
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut stream = Box::pin(resp.bytes_stream());
        let mut decoder = SseDecoder::default();
        let mut early = Vec::new();

        let endpoint = tokio::time::timeout(
            self.request_timeout,
            await_endpoint(&mut stream, &mut decoder, &self.url, &mut early),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        for event in early {
            dispatch(&self.pending, event);
        }

        let pending = Arc::clone(&self.pending);
        let alive = Arc::clone(&self.alive);
        let cancel = self.cancel.clone();
        let url = self.url.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    chunk = stream.next() => match chunk {
                        Some(Ok(bytes)) => {
                            for event in decoder.feed(&bytes) {
                                dispatch(&pending, event);
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(url = %url, error = %e, "MCP SSE stream failed");
                            break;
                        }
                        None => {
                            tracing::debug!(url = %url, "MCP SSE stream ended");
                            break;
                        }
                    },
                }
            }
            alive.store(false, Ordering::SeqCst);
            // Dropping the senders wakes every waiter with `Closed`.
            pending.lock().clear();
        });

        tracing::debug!(url = %self.url, endpoint = %endpoint, "MCP SSE endpoint announced");
        Ok(endpoint)
    }

    async fn post_message<T: Serialize>(&self, endpoint: &Url, body: &T) -> Result<(), TransportError> {
        let resp = self
            .http
            .post(endpoint.clone())
            .headers(self.headers.clone())
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Read events until the server names the endpoint to POST messages to.
/// Events that arrive in the same chunk after it are kept in `early`.
async fn await_endpoint<S, B>(
    stream: &mut S,
    decoder: &mut SseDecoder,
    base: &Url,
    early: &mut Vec<SseEvent>,
) -> Result<Url, TransportError>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let mut events = decoder.feed(chunk.as_ref()).into_iter();
        while let Some(event) = events.next() {
            if event.event.as_deref() == Some("endpoint") {
                early.extend(events);
                return base.join(event.data.trim()).map_err(|e| {
                    TransportError::InvalidConfig(format!("bad SSE endpoint '{}': {e}", event.data))
                });
            }
        }
    }
    Err(TransportError::Closed)
}

fn dispatch(pending: &PendingMap, event: SseEvent) {
    if !event.is_message() {
        return;
    }
    match serde_json::from_str::<JsonRpcResponse>(&event.data) {
        Ok(resp) => match pending.lock().remove(&resp.id) {
            Some(tx) => {
                let _ = tx.send(resp);
            }
            None => tracing::debug!(id = resp.id, "unsolicited MCP response"),
        },
        // Server-initiated requests and notifications are not handled.
        Err(_) => tracing::debug!(data = %event.data, "skipping non-response SSE message"),
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Closed);
        }
        let endpoint = self.endpoint().await?;

        let id = self.next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        tracing::debug!(id, method, endpoint = %endpoint, "sending MCP request");
        if let Err(e) = self.post_message(&endpoint, &req).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Closed);
        }
        let endpoint = self.endpoint().await?;
        tracing::debug!(method, endpoint = %endpoint, "sending MCP notification");
        self.post_message(&endpoint, &JsonRpcNotification::new(method))
            .await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        self.pending.lock().clear();
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
