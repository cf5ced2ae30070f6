//! MCP SSE Core - session-scoped JSON-RPC over a Server-Sent Events stream.
//!
//! A client opens a long-lived event stream, receives the address it should
//! POST calls to, and then gets every result back on that same stream. This
//! crate provides both ends: an axum server that hosts a
//! [`ProcedureRegistry`], and [`McpClient`], which correlates streamed results
//! with the calls that produced them.
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_sse_core::{start_server, McpClient, ParamKind, ParamSchema, Procedure,
//!     ProcedureRegistry, ServerConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> mcp_sse_core::Result<()> {
//!     let registry = ProcedureRegistry::builder()
//!         .procedure(Procedure::from_fn(
//!             "add_numbers",
//!             "Add two numbers together.",
//!             ParamSchema::new()
//!                 .required("a", ParamKind::Integer)
//!                 .required("b", ParamKind::Integer),
//!             |args: serde_json::Value| Ok(args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)),
//!         ))
//!         .build()?;
//!
//!     let server = start_server(ServerConfig::default(), registry).await?;
//!     let client = McpClient::connect(&format!("http://{}/sse", server.addr())).await?;
//!
//!     let sum = client.call_text("add_numbers", json!({"a": 15, "b": 27})).await?;
//!     assert_eq!(sum, "42");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod sse;

// Re-export commonly used types
pub use client::McpClient;
pub use config::{ClientConfig, ServerConfig, TransportConfig};
pub use dispatcher::{Ack, Dispatcher};
pub use error::{McpError, Result};
pub use protocol::{
    CallParams, Content, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId,
    ToolDescriptor, ToolOutput,
};
pub use registry::{
    ParamKind, ParamSchema, Procedure, ProcedureRegistry, ProcedureRegistryBuilder, ToolError,
    ToolHandler,
};
pub use server::{start_server, ServerHandle};
pub use session::{Session, SessionId, SessionManager, StreamChannel, StreamEvent};
