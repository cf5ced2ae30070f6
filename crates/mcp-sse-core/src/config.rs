//! Centralized configuration for the SSE transport.
//!
//! Wire-level constants live on `TransportConfig`; the tunables a caller may
//! want to change are plain structs with `Default` implementations.

use std::time::Duration;

/// Transport constants shared by server and client.
pub struct TransportConfig;

impl TransportConfig {
    pub const SERVER_NAME: &'static str = "calculator-server";
    pub const SERVER_VERSION: &'static str = env!("CARGO_PKG_VERSION");
    pub const PROTOCOL_VERSION: &'static str = "2024-11-05";
    pub const JSONRPC_VERSION: &'static str = "2.0";

    // Routes
    pub const SSE_PATH: &'static str = "/sse";
    pub const MESSAGES_PATH: &'static str = "/messages/";
    pub const HEALTH_PATH: &'static str = "/health";
    pub const SESSION_QUERY_PARAM: &'static str = "session_id";

    // SSE event names
    pub const ENDPOINT_EVENT: &'static str = "endpoint";
    pub const MESSAGE_EVENT: &'static str = "message";

    pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
    pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

    // Client defaults
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Settings for [`crate::server::start_server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on (0 = auto-assign).
    pub port: u16,
    /// Interval between SSE keep-alive comments. Also bounds how long a dead
    /// client can go unnoticed.
    pub keep_alive: Duration,
    /// Name reported in the `initialize` result.
    pub server_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            keep_alive: TransportConfig::KEEP_ALIVE_INTERVAL,
            server_name: TransportConfig::SERVER_NAME.to_string(),
        }
    }
}

/// Settings for [`crate::client::McpClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long `connect` waits for the endpoint event.
    pub connect_timeout: Duration,
    /// Per-call timeout. `None` waits until the result or a disconnect.
    pub call_timeout: Option<Duration>,
    /// Name sent in the `initialize` request.
    pub client_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: TransportConfig::CONNECT_TIMEOUT,
            call_timeout: None,
            client_name: "mcp-sse-client".to_string(),
        }
    }
}
