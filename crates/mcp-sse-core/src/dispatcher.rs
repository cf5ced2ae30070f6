//! Request dispatcher: validates inbound messages and routes them.
//!
//! `handle_message` runs synchronously up to the point where a call is either
//! rejected or accepted. Accepted tool calls execute on their own tokio task
//! and publish their Result Event to the owning session when done, so slow
//! procedures never hold up other calls on the same or other sessions.

use crate::config::TransportConfig;
use crate::error::{McpError, Result};
use crate::protocol::{
    initialize_result, CallParams, JsonRpcRequest, JsonRpcResponse, RequestId, ToolOutput,
    METHOD_INITIALIZE, METHOD_PING, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, NOTIFICATION_PREFIX,
};
use crate::registry::{Procedure, ProcedureRegistry};
use crate::session::{Delivery, Session, SessionId, SessionManager};
use futures::FutureExt;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Synchronous acknowledgment of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// A call was accepted; its result will arrive on the stream.
    Accepted(RequestId),
    /// A notification was consumed; nothing will be published.
    Notification,
}

/// Routes inbound JSON-RPC messages to procedures.
#[derive(Debug)]
pub struct Dispatcher {
    sessions: Arc<SessionManager>,
    registry: Arc<ProcedureRegistry>,
    server_name: String,
}

impl Dispatcher {
    pub fn new(sessions: Arc<SessionManager>, registry: Arc<ProcedureRegistry>) -> Self {
        Self {
            sessions,
            registry,
            server_name: TransportConfig::SERVER_NAME.to_string(),
        }
    }

    /// Name reported in `initialize` results.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<ProcedureRegistry> {
        &self.registry
    }

    /// Validate and route one message for `session_id`.
    ///
    /// Any `Err` is a synchronous rejection: nothing is published on the
    /// stream for it.
    pub fn handle_message(&self, session_id: &SessionId, request: JsonRpcRequest) -> Result<Ack> {
        let session = self.sessions.lookup(session_id)?;

        if request.jsonrpc != TransportConfig::JSONRPC_VERSION {
            return Err(McpError::InvalidRequest {
                message: "expected jsonrpc 2.0".to_string(),
            });
        }

        let Some(id) = request.id.clone() else {
            return Self::handle_notification(session_id, &request.method);
        };

        let params = request.params.unwrap_or(Value::Null);
        match request.method.as_str() {
            METHOD_TOOLS_CALL => {
                let envelope: CallParams =
                    serde_json::from_value(params).map_err(|e| McpError::InvalidRequest {
                        message: format!("malformed tools/call params: {}", e),
                    })?;
                self.handle_call(&session, id, envelope)
            }
            METHOD_INITIALIZE => {
                info!("Session {}: initialize", session_id);
                self.reply(&session, id, initialize_result(&self.server_name))
            }
            METHOD_PING => self.reply(&session, id, json!({})),
            METHOD_TOOLS_LIST => {
                let tools = self.registry.descriptors();
                self.reply(&session, id, json!({ "tools": tools }))
            }
            other => {
                warn!("Method not found: {}", other);
                Err(McpError::MethodNotFound {
                    method: other.to_string(),
                })
            }
        }
    }

    /// Only `notifications/*` may omit the id; a request without one could
    /// never be answered.
    fn handle_notification(session_id: &SessionId, method: &str) -> Result<Ack> {
        match method {
            m if m.starts_with(NOTIFICATION_PREFIX) => {
                debug!("Session {}: notification {}", session_id, m);
                Ok(Ack::Notification)
            }
            METHOD_TOOLS_CALL | METHOD_INITIALIZE | METHOD_PING | METHOD_TOOLS_LIST => {
                Err(McpError::InvalidRequest {
                    message: format!("{} requires an id", method),
                })
            }
            other => {
                warn!("Method not found: {}", other);
                Err(McpError::MethodNotFound {
                    method: other.to_string(),
                })
            }
        }
    }

    /// Accept a `tools/call` envelope and start executing it.
    ///
    /// Validation order: duplicate id, procedure name, arguments. The
    /// session check already happened in `handle_message`.
    pub fn handle_call(
        &self,
        session: &Arc<Session>,
        id: RequestId,
        envelope: CallParams,
    ) -> Result<Ack> {
        let CallParams { name, arguments } = envelope;
        let arguments = arguments.unwrap_or(Value::Null);
        let registry = &self.registry;

        session.accept(id.clone(), METHOD_TOOLS_CALL, || {
            let procedure = registry.get(&name).ok_or_else(|| McpError::UnknownProcedure {
                name: name.clone(),
            })?;
            procedure.validate(&arguments)?;
            debug!("Session {}: tools/call {} {}", session.id(), name, arguments);
            Ok(execute(
                Arc::clone(&self.sessions),
                Arc::clone(session),
                id.clone(),
                procedure,
                arguments,
            ))
        })?;

        Ok(Ack::Accepted(id))
    }

    fn reply(&self, session: &Session, id: RequestId, result: Value) -> Result<Ack> {
        session.reply(&id, JsonRpcResponse::success(Some(id.clone()), result))?;
        Ok(Ack::Accepted(id))
    }
}

/// Run one procedure and publish its outcome exactly once.
async fn execute(
    sessions: Arc<SessionManager>,
    session: Arc<Session>,
    id: RequestId,
    procedure: Arc<Procedure>,
    arguments: Value,
) {
    let outcome = AssertUnwindSafe(procedure.invoke(arguments))
        .catch_unwind()
        .await;

    let response = match outcome {
        Ok(Ok(value)) => match serde_json::to_value(ToolOutput::from_value(&value)) {
            Ok(result) => JsonRpcResponse::success(Some(id.clone()), result),
            Err(e) => JsonRpcResponse::from_error(Some(id.clone()), &McpError::from(e)),
        },
        Ok(Err(tool_error)) => {
            debug!("Tool {} failed: {}", procedure.name(), tool_error);
            JsonRpcResponse::from_error(
                Some(id.clone()),
                &McpError::Tool {
                    message: tool_error.to_string(),
                },
            )
        }
        Err(_) => {
            warn!("Tool {} panicked", procedure.name());
            JsonRpcResponse::from_error(
                Some(id.clone()),
                &McpError::Tool {
                    message: format!("Tool {} failed unexpectedly", procedure.name()),
                },
            )
        }
    };

    if session.complete(&id, response) == Delivery::StreamClosed {
        // Nobody is reading any more; abandon everything else still pending.
        sessions.close_session(session.id());
    }
}
