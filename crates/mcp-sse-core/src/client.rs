//! Client correlator.
//!
//! `McpClient` opens the session stream, learns the request address from the
//! first `endpoint` event, and then matches `message` events to outstanding
//! calls by request id. Calls may overlap freely and resolve in whatever order
//! the server finishes them.

use crate::config::{ClientConfig, TransportConfig};
use crate::error::{McpError, Result};
use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, RequestId, ToolDescriptor, ToolOutput, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::sse::{SseDecoder, SseEvent};
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

type Outcome = Result<Value>;

/// Calls awaiting their Result Event.
#[derive(Default)]
struct PendingTable {
    /// Set once the stream has ended; no new calls are registered after that.
    closed: bool,
    calls: HashMap<RequestId, oneshot::Sender<Outcome>>,
}

impl PendingTable {
    /// Fail every remaining call with `ConnectionLost`.
    fn drain(&mut self) -> usize {
        self.closed = true;
        let calls = std::mem::take(&mut self.calls);
        let count = calls.len();
        for (_, tx) in calls {
            let _ = tx.send(Err(McpError::ConnectionLost));
        }
        count
    }
}

type SharedPending = Arc<Mutex<PendingTable>>;

fn lock(pending: &Mutex<PendingTable>) -> MutexGuard<'_, PendingTable> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a call's pending entry when its future finishes or is dropped,
/// freeing the id for reuse.
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingTable>,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).calls.remove(&self.id);
    }
}

#[derive(Deserialize)]
struct ToolsListResult {
    tools: Vec<ToolDescriptor>,
}

/// Client for an SSE session.
pub struct McpClient {
    http: reqwest::Client,
    endpoint: Url,
    config: ClientConfig,
    next_id: AtomicI64,
    pending: SharedPending,
    reader: Option<JoinHandle<()>>,
}

impl McpClient {
    /// Connect with default settings.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, ClientConfig::default()).await
    }

    /// Open the stream and wait for the session's request address.
    pub async fn connect_with_config(url: &str, config: ClientConfig) -> Result<Self> {
        let stream_url = Url::parse(url)?;
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        let handshake = async {
            let response = http
                .get(stream_url.clone())
                .header(ACCEPT, "text/event-stream")
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(McpError::Connection {
                    message: format!("Stream request failed with HTTP {}", response.status()),
                });
            }

            let mut body = Box::pin(response.bytes_stream());
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = body.next().await {
                let mut events = decoder.feed(&chunk?)?.into_iter();
                while let Some(event) = events.next() {
                    if event.event == TransportConfig::ENDPOINT_EVENT {
                        let backlog: Vec<SseEvent> = events.collect();
                        return Ok::<_, McpError>((event.data, body, decoder, backlog));
                    }
                    debug!("Ignoring {} event before endpoint", event.event);
                }
            }
            Err(McpError::Connection {
                message: "Stream closed before the endpoint event".to_string(),
            })
        };

        let (path, body, decoder, backlog) =
            tokio::time::timeout(config.connect_timeout, handshake)
                .await
                .map_err(|_| McpError::Connection {
                    message: format!(
                        "No endpoint event within {:?}",
                        config.connect_timeout
                    ),
                })??;

        let endpoint = stream_url.join(&path)?;
        info!("Connected to {} (requests go to {})", stream_url, endpoint);

        let pending = SharedPending::default();
        let reader = tokio::spawn(read_stream(body, decoder, backlog, pending.clone()));

        Ok(Self {
            http,
            endpoint,
            config,
            next_id: AtomicI64::new(1),
            pending,
            reader: Some(reader),
        })
    }

    /// Address the server advertised for this session.
    pub fn session_endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Session id embedded in the request address.
    pub fn session_id(&self) -> Option<String> {
        self.endpoint
            .query_pairs()
            .find(|(key, _)| key == TransportConfig::SESSION_QUERY_PARAM)
            .map(|(_, value)| value.into_owned())
    }

    /// Number of calls still waiting for a result.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).calls.len()
    }

    /// False once the stream has ended or `disconnect` was called.
    pub fn is_connected(&self) -> bool {
        !lock(&self.pending).closed
    }

    /// Issue a request and wait for its Result Event.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let (id, rx) = self.register()?;
        let _guard = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };

        let request = JsonRpcRequest::new(method, params, id.clone());
        debug!("-> {} ({})", method, id);
        self.post(&request).await?;

        let outcome = match self.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Call {} ({}) timed out after {:?}", id, method, limit);
                    return Err(McpError::Timeout(limit));
                }
            },
            None => rx.await,
        };
        outcome.unwrap_or(Err(McpError::ConnectionLost))
    }

    /// Invoke a procedure.
    ///
    /// Domain failures come back as `McpError::Tool`.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        let result = self
            .request(METHOD_TOOLS_CALL, json!({ "name": name, "arguments": arguments }))
            .await?;
        let output: ToolOutput = serde_json::from_value(result)?;
        if output.is_error {
            return Err(McpError::Tool {
                message: output.text().unwrap_or_default().to_string(),
            });
        }
        Ok(output)
    }

    /// Invoke a procedure and return the text of its result.
    pub async fn call_text(&self, name: &str, arguments: Value) -> Result<String> {
        let output = self.call(name, arguments).await?;
        Ok(output.text().unwrap_or_default().to_string())
    }

    /// Run the `initialize` handshake and send `notifications/initialized`.
    pub async fn initialize(&self) -> Result<Value> {
        let result = self
            .request(
                METHOD_INITIALIZE,
                json!({
                    "protocolVersion": TransportConfig::PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": self.config.client_name,
                        "version": TransportConfig::SERVER_VERSION
                    }
                }),
            )
            .await?;
        self.notify(METHOD_INITIALIZED).await?;
        Ok(result)
    }

    /// Fetch the server's procedure descriptors.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = self.request(METHOD_TOOLS_LIST, json!({})).await?;
        let list: ToolsListResult = serde_json::from_value(result)?;
        Ok(list.tools)
    }

    /// Send a notification. No result is expected.
    pub async fn notify(&self, method: &str) -> Result<()> {
        self.post(&JsonRpcRequest::notification(method)).await
    }

    /// Close the stream. Pending calls fail with `ConnectionLost` and the
    /// server closes the session once it notices.
    pub fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let abandoned = lock(&self.pending).drain();
            info!("Disconnected ({} pending call(s) abandoned)", abandoned);
        }
    }

    fn register(&self) -> Result<(RequestId, oneshot::Receiver<Outcome>)> {
        let mut table = lock(&self.pending);
        if table.closed {
            return Err(McpError::ConnectionLost);
        }
        let id = loop {
            let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
            if !table.calls.contains_key(&id) {
                break id;
            }
        };
        let (tx, rx) = oneshot::channel();
        table.calls.insert(id.clone(), tx);
        Ok((id, rx))
    }

    async fn post(&self, message: &JsonRpcRequest) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<JsonRpcResponse>(&body) {
            Ok(JsonRpcResponse {
                error: Some(error), ..
            }) => Err(McpError::from_rpc_error(error.code, error.message)),
            _ => Err(McpError::Network {
                message: format!("Request rejected with HTTP {}: {}", status, body),
            }),
        }
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Consume the stream until it ends, completing calls as results arrive.
async fn read_stream<S, B, E>(
    mut body: S,
    mut decoder: SseDecoder,
    backlog: Vec<SseEvent>,
    pending: SharedPending,
) where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    for event in backlog {
        route_event(&pending, event);
    }

    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => match decoder.feed(bytes.as_ref()) {
                Ok(events) => {
                    for event in events {
                        route_event(&pending, event);
                    }
                }
                Err(e) => {
                    warn!("Dropping stream: {}", e);
                    break;
                }
            },
            Err(e) => {
                warn!("Stream read failed: {}", e);
                break;
            }
        }
    }

    let abandoned = lock(&pending).drain();
    if abandoned > 0 {
        warn!("Stream ended with {} call(s) pending", abandoned);
    } else {
        debug!("Stream ended");
    }
}

fn route_event(pending: &Mutex<PendingTable>, event: SseEvent) {
    if event.event != TransportConfig::MESSAGE_EVENT {
        debug!("Ignoring {} event", event.event);
        return;
    }

    let response: JsonRpcResponse = match serde_json::from_str(&event.data) {
        Ok(response) => response,
        Err(e) => {
            warn!("Discarding undecodable message event: {}", e);
            return;
        }
    };
    let Some(id) = response.id.clone() else {
        debug!("Discarding message without id");
        return;
    };

    let Some(tx) = lock(pending).calls.remove(&id) else {
        // Already timed out or never issued.
        debug!("Discarding result for {} with no pending call", id);
        return;
    };

    let outcome = match response.error {
        Some(error) => Err(McpError::from_rpc_error(error.code, error.message)),
        None => Ok(response.result.unwrap_or(Value::Null)),
    };
    let _ = tx.send(outcome);
}
