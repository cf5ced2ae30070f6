//! HTTP server implementation using Axum.
//!
//! Routes:
//! - `GET /sse` opens a session and streams its events
//! - `POST /messages/?session_id=<id>` submits one JSON-RPC message
//! - `GET /health` reports liveness and the number of open sessions

use crate::config::{ServerConfig, TransportConfig};
use crate::dispatcher::Dispatcher;
use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::registry::ProcedureRegistry;
use crate::session::{SessionId, SessionManager, StreamEvent, StreamReceiver};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Application state shared across handlers.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub keep_alive: Duration,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, keep_alive: Duration) -> Self {
        Self {
            dispatcher,
            keep_alive,
        }
    }

    fn sessions(&self) -> &Arc<SessionManager> {
        self.dispatcher.sessions()
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Build the router. Exposed separately so tests can drive it in-process.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(TransportConfig::HEALTH_PATH, get(handle_health))
        .route(TransportConfig::SSE_PATH, get(handle_sse))
        .route(TransportConfig::MESSAGES_PATH, post(handle_message))
        .layer(DefaultBodyLimit::max(TransportConfig::MAX_MESSAGE_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint.
pub async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({"status": "ok", "sessions": state.sessions().len()}))
}

/// Stream endpoint: one new session per connection.
pub async fn handle_sse(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Response {
    // A stream is bound to its session for life; reattaching is refused.
    if let Some(raw) = query.session_id {
        let live = SessionId::parse(&raw)
            .map(|id| state.sessions().contains(&id))
            .unwrap_or(false);
        let err = if live {
            McpError::InvalidRequest {
                message: format!("Session {} already has a stream", raw),
            }
        } else {
            McpError::SessionNotFound { session_id: raw }
        };
        let status = if live {
            StatusCode::CONFLICT
        } else {
            StatusCode::NOT_FOUND
        };
        warn!("Rejected stream request: {}", err);
        return (status, Json(JsonRpcResponse::from_error(None, &err))).into_response();
    }

    let (session, receiver) = state.sessions().open_session();
    let stream = SessionStream {
        receiver,
        sessions: state.sessions().clone(),
        id: session.id().clone(),
    }
    .map(to_sse_event);

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(state.keep_alive))
        .into_response()
}

fn to_sse_event(event: StreamEvent) -> Result<Event> {
    Ok(Event::default().event(event.event_name()).data(event.data()?))
}

/// Request endpoint: validates and accepts one message.
///
/// 202 means accepted; the outcome arrives on the stream. Anything else is a
/// rejection carrying a JSON-RPC error body, and nothing is streamed for it.
pub async fn handle_message(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    let Some(raw) = query.session_id else {
        return reject(
            None,
            McpError::InvalidRequest {
                message: "session_id is required".to_string(),
            },
        );
    };
    let session_id = match SessionId::parse(&raw) {
        Ok(id) => id,
        Err(e) => return reject(None, e),
    };
    let request = match JsonRpcRequest::parse(&body) {
        Ok(request) => request,
        Err(e) => return reject(None, e),
    };

    let id = request.id.clone();
    debug!("Session {}: {} ({:?})", session_id, request.method, id);
    match state.dispatcher.handle_message(&session_id, request) {
        Ok(_) => (StatusCode::ACCEPTED, "Accepted").into_response(),
        Err(e) => reject(id, e),
    }
}

fn reject(id: Option<RequestId>, err: McpError) -> Response {
    debug!("Rejected message {:?}: {}", id, err);
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(JsonRpcResponse::from_error(id, &err))).into_response()
}

/// Session stream that closes its session when the response body is dropped,
/// which is how a client disconnect shows up.
struct SessionStream {
    receiver: StreamReceiver,
    sessions: Arc<SessionManager>,
    id: SessionId,
}

impl Stream for SessionStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        debug!("Stream for session {} dropped", self.id);
        self.sessions.close_session(&self.id);
    }
}

/// Handle to a running server. Dropping stops it.
pub struct ServerHandle {
    addr: SocketAddr,
    sessions: Arc<SessionManager>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the server is bound to (useful when port=0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Close every session and stop accepting connections.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let closed = self.sessions.close_all();
            info!("Server shutting down ({} session(s) closed)", closed);
            let _ = tx.send(());
        }
    }

    /// Wait for the server task to finish after `shutdown`.
    pub async fn join(mut self) {
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Start the SSE server.
///
/// Returns once the listener is bound; serving continues on a background task.
pub async fn start_server(config: ServerConfig, registry: ProcedureRegistry) -> Result<ServerHandle> {
    let sessions = Arc::new(SessionManager::new(TransportConfig::MESSAGES_PATH));
    let dispatcher = Dispatcher::new(sessions.clone(), Arc::new(registry))
        .with_server_name(config.server_name.clone());
    let app = router(Arc::new(AppState::new(dispatcher, config.keep_alive)));

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;

    info!("Server listening on {}", addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task_handle = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = result {
            error!("Server error: {}", e);
        }
    });

    Ok(ServerHandle {
        addr,
        sessions,
        shutdown_tx: Some(shutdown_tx),
        task_handle: Some(task_handle),
    })
}
