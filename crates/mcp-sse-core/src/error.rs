//! Error types for the SSE transport.
//!
//! Errors fall into four groups: connection errors (stream never established
//! or lost), protocol errors (rejected synchronously at the request endpoint),
//! domain errors (raised by a procedure and delivered as a failure outcome),
//! and client-local timeouts.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the transport.
#[derive(Debug, Error)]
pub enum McpError {
    // Connection errors
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Connection lost before the call resolved")]
    ConnectionLost,

    #[error("Session closed")]
    SessionClosed,

    #[error("Stream channel closed")]
    StreamClosed,

    // Protocol errors
    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Could not find session: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Duplicate request id {id} is already pending in this session")]
    DuplicateRequest { id: String },

    #[error("Unknown tool: {name}")]
    UnknownProcedure { name: String },

    #[error("Invalid arguments: {message}")]
    InvalidArguments { message: String },

    #[error("Tool already registered: {name}")]
    DuplicateProcedure { name: String },

    // Domain errors reported by a procedure
    #[error("{message}")]
    Tool { message: String },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    /// Error object received from the remote peer that does not map onto a
    /// more specific variant.
    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, McpError>;

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        McpError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            McpError::Connection {
                message: err.to_string(),
            }
        } else {
            McpError::Network {
                message: err.to_string(),
            }
        }
    }
}

impl From<url::ParseError> for McpError {
    fn from(err: url::ParseError) -> Self {
        McpError::Connection {
            message: format!("Invalid endpoint URL: {}", err),
        }
    }
}

impl McpError {
    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32601: Method (or tool) not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Transport-defined codes:
    /// - -32001: Session not found
    /// - -32002: Duplicate request id
    /// - -32003: Tool execution failed
    /// - -32004: Session closed / connection lost
    /// - -32005: Timeout
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            McpError::Parse { .. } | McpError::Json { .. } => -32700,
            McpError::InvalidRequest { .. } => -32600,
            McpError::MethodNotFound { .. } | McpError::UnknownProcedure { .. } => -32601,
            McpError::InvalidArguments { .. } => -32602,
            McpError::SessionNotFound { .. } => -32001,
            McpError::DuplicateRequest { .. } => -32002,
            McpError::Tool { .. } => -32003,
            McpError::SessionClosed
            | McpError::StreamClosed
            | McpError::ConnectionLost
            | McpError::Connection { .. } => -32004,
            McpError::Timeout(_) => -32005,
            McpError::Remote { code, .. } => *code,
            _ => -32603,
        }
    }

    /// HTTP status used when this error rejects a POSTed message.
    pub fn http_status(&self) -> u16 {
        match self {
            McpError::SessionNotFound { .. } => 404,
            McpError::SessionClosed | McpError::StreamClosed => 410,
            McpError::Parse { .. }
            | McpError::Json { .. }
            | McpError::InvalidRequest { .. }
            | McpError::MethodNotFound { .. }
            | McpError::DuplicateRequest { .. }
            | McpError::UnknownProcedure { .. }
            | McpError::InvalidArguments { .. } => 400,
            _ => 500,
        }
    }

    /// Rebuild a typed error from a JSON-RPC error object received off the wire.
    pub fn from_rpc_error(code: i32, message: String) -> Self {
        match code {
            -32700 => McpError::Parse { message },
            -32600 => McpError::InvalidRequest { message },
            -32602 => McpError::InvalidArguments { message },
            -32001 => McpError::SessionNotFound {
                session_id: detail(&message, "Could not find session: "),
            },
            -32002 => McpError::DuplicateRequest {
                id: detail(&message, "Duplicate request id ")
                    .trim_end_matches(" is already pending in this session")
                    .to_string(),
            },
            -32601 if message.starts_with("Method not found: ") => McpError::MethodNotFound {
                method: detail(&message, "Method not found: "),
            },
            -32601 => McpError::UnknownProcedure {
                name: detail(&message, "Unknown tool: "),
            },
            -32003 => McpError::Tool { message },
            -32004 => McpError::SessionClosed,
            _ => McpError::Remote { code, message },
        }
    }

    /// True when the call was abandoned rather than resolved by the server.
    pub fn is_abandoned(&self) -> bool {
        matches!(
            self,
            McpError::ConnectionLost
                | McpError::SessionClosed
                | McpError::StreamClosed
                | McpError::Timeout(_)
        )
    }
}

/// Strip the display prefix a variant added on the sending side.
fn detail(message: &str, prefix: &str) -> String {
    message.strip_prefix(prefix).unwrap_or(message).to_string()
}
