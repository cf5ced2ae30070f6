//! Session table and per-session pending-call state.
//!
//! # Locking
//!
//! Every session guards its open flag and pending-call table with one mutex.
//! Accepting a call, resolving it and tearing the session down all take that
//! mutex, so a result can never be published to a session that has already
//! been drained. No `.await` happens while the mutex is held.

use super::stream::{stream_channel, StreamChannel, StreamEvent, StreamReceiver};
use crate::config::TransportConfig;
use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcResponse, RequestId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Opaque session identifier, rendered as 32 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse an identifier received in a query string.
    pub fn parse(raw: &str) -> Result<Self> {
        Uuid::parse_str(raw)
            .map(|uuid| Self(uuid.simple().to_string()))
            .map_err(|_| McpError::InvalidRequest {
                message: format!("Invalid session ID: {}", raw),
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bookkeeping for one accepted, unresolved call.
#[derive(Debug)]
struct PendingCall {
    method: String,
    accepted_at: Instant,
    task: AbortHandle,
}

#[derive(Debug)]
struct SessionState {
    open: bool,
    pending: HashMap<RequestId, PendingCall>,
}

/// What happened to a result handed to [`Session::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Published on the session stream.
    Delivered,
    /// No pending entry for the id (already resolved or abandoned).
    NotPending,
    /// The session was closed first; the result was discarded.
    SessionClosed,
    /// The consumer is gone; the pending entry was dropped with the result.
    StreamClosed,
}

/// A server-side context binding one stream to its in-flight calls.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    channel: StreamChannel,
    state: Mutex<SessionState>,
    opened_at: Instant,
}

impl Session {
    fn new(id: SessionId, channel: StreamChannel) -> Self {
        Self {
            id,
            channel,
            state: Mutex::new(SessionState {
                open: true,
                pending: HashMap::new(),
            }),
            opened_at: Instant::now(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn is_open(&self) -> bool {
        self.lock_state().open
    }

    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.lock_state().pending.contains_key(id)
    }

    /// Record `id` as pending and spawn the work that will resolve it.
    ///
    /// `prepare` runs only after the session and duplicate-id checks pass,
    /// and may itself reject the call. The spawned future is expected to
    /// finish by calling [`Session::complete`] for the same id.
    pub fn accept<F>(
        &self,
        id: RequestId,
        method: &str,
        prepare: impl FnOnce() -> Result<F>,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.lock_state();
        if !state.open {
            return Err(McpError::SessionClosed);
        }
        if state.pending.contains_key(&id) {
            return Err(McpError::DuplicateRequest { id: id.to_string() });
        }

        let work = prepare()?;
        let handle = tokio::spawn(work);
        debug!("Session {}: accepted {} ({})", self.id, id, method);
        state.pending.insert(
            id,
            PendingCall {
                method: method.to_string(),
                accepted_at: Instant::now(),
                task: handle.abort_handle(),
            },
        );
        Ok(())
    }

    /// Resolve a pending call by publishing its Result Event.
    pub fn complete(&self, id: &RequestId, response: JsonRpcResponse) -> Delivery {
        let mut state = self.lock_state();
        if !state.open {
            debug!("Session {}: discarding result for {} after close", self.id, id);
            return Delivery::SessionClosed;
        }
        let Some(call) = state.pending.remove(id) else {
            debug!("Session {}: no pending call for {}, discarding", self.id, id);
            return Delivery::NotPending;
        };

        match self.channel.publish(StreamEvent::Message(response)) {
            Ok(()) => {
                debug!(
                    "Session {}: resolved {} ({}) in {:?}",
                    self.id,
                    id,
                    call.method,
                    call.accepted_at.elapsed()
                );
                Delivery::Delivered
            }
            Err(_) => {
                warn!(
                    "Session {}: stream gone, dropped result for {} ({})",
                    self.id, id, call.method
                );
                Delivery::StreamClosed
            }
        }
    }

    /// Answer a request immediately without entering the pending table.
    ///
    /// Still rejects an id that is currently pending.
    pub fn reply(&self, id: &RequestId, response: JsonRpcResponse) -> Result<()> {
        let state = self.lock_state();
        if !state.open {
            return Err(McpError::SessionClosed);
        }
        if state.pending.contains_key(id) {
            return Err(McpError::DuplicateRequest { id: id.to_string() });
        }
        self.channel.publish(StreamEvent::Message(response))
    }

    /// Publish a control event such as the endpoint announcement.
    pub(crate) fn publish(&self, event: StreamEvent) -> Result<()> {
        if !self.lock_state().open {
            return Err(McpError::SessionClosed);
        }
        self.channel.publish(event)
    }

    /// Tear the session down. Idempotent.
    ///
    /// Every pending call is abandoned: its task is aborted and, if the
    /// consumer is still attached, a session-closed error is published for it
    /// before the stream ends. Returns the abandoned ids.
    fn close(&self) -> Vec<RequestId> {
        let mut state = self.lock_state();
        if !state.open {
            return Vec::new();
        }
        state.open = false;

        let mut abandoned = Vec::with_capacity(state.pending.len());
        for (id, call) in state.pending.drain() {
            call.task.abort();
            warn!(
                "Session {}: abandoning {} ({}) pending for {:?}",
                self.id,
                id,
                call.method,
                call.accepted_at.elapsed()
            );
            let response = JsonRpcResponse::from_error(Some(id.clone()), &McpError::SessionClosed);
            let _ = self.channel.publish(StreamEvent::Message(response));
            abandoned.push(id);
        }
        self.channel.close();
        abandoned
    }
}

/// Owns every live session, keyed by identifier.
#[derive(Debug)]
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    endpoint_base: String,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(TransportConfig::MESSAGES_PATH)
    }
}

impl SessionManager {
    /// Create a manager whose sessions advertise `endpoint_base` as their
    /// request address.
    pub fn new(endpoint_base: impl Into<String>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            endpoint_base: endpoint_base.into(),
        }
    }

    /// Open a session and return it with the consumer half of its stream.
    ///
    /// The endpoint event is already queued on the returned receiver.
    pub fn open_session(&self) -> (Arc<Session>, StreamReceiver) {
        let (channel, receiver) = stream_channel();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);

        let mut id = SessionId::generate();
        while sessions.contains_key(&id) {
            id = SessionId::generate();
        }

        let session = Arc::new(Session::new(id.clone(), channel));
        sessions.insert(id.clone(), session.clone());
        drop(sessions);

        // Fresh channel with the receiver in hand: this cannot fail.
        let _ = session.publish(StreamEvent::Endpoint(self.endpoint_for(&id)));
        info!("Session {} opened", id);
        (session, receiver)
    }

    /// Request address advertised for `id`.
    pub fn endpoint_for(&self, id: &SessionId) -> String {
        format!(
            "{}?{}={}",
            self.endpoint_base,
            TransportConfig::SESSION_QUERY_PARAM,
            id
        )
    }

    /// Remove and tear down a session. Idempotent; unknown ids are a no-op.
    ///
    /// Returns the request ids that were still pending.
    pub fn close_session(&self, id: &SessionId) -> Vec<RequestId> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);

        match removed {
            Some(session) => {
                let abandoned = session.close();
                info!(
                    "Session {} closed after {:?} ({} pending call(s) abandoned)",
                    id,
                    session.age(),
                    abandoned.len()
                );
                abandoned
            }
            None => Vec::new(),
        }
    }

    /// Close every session. Used on server shutdown.
    pub fn close_all(&self) -> usize {
        let ids: Vec<SessionId> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for id in &ids {
            self.close_session(id);
        }
        ids.len()
    }

    /// Resolve a live session.
    pub fn lookup(&self, id: &SessionId) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| McpError::SessionNotFound {
                session_id: id.to_string(),
            })
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
