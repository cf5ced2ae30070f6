//! End-to-end tests for the SSE transport.
//!
//! Each test starts an in-process server on an ephemeral port and talks to it
//! either through `McpClient` or through raw HTTP, so the wire format is
//! exercised as well as the correlator.

use bytes::Bytes;
use futures::StreamExt;
use mcp_sse_core::sse::{SseDecoder, SseEvent};
use mcp_sse_core::{
    start_server, ClientConfig, McpClient, McpError, ParamKind, ParamSchema, Procedure,
    ProcedureRegistry, ServerConfig, ServerHandle, SessionId, ToolError,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::pin::Pin;
use std::time::{Duration, Instant};

#[derive(Deserialize)]
struct IntPair {
    a: i64,
    b: i64,
}

#[derive(Deserialize)]
struct FloatPair {
    a: f64,
    b: f64,
}

#[derive(Deserialize)]
struct Delay {
    ms: u64,
}

fn test_registry() -> ProcedureRegistry {
    let ints = || {
        ParamSchema::new()
            .required("a", ParamKind::Integer)
            .required("b", ParamKind::Integer)
    };
    ProcedureRegistry::builder()
        .procedure(Procedure::from_fn(
            "add_numbers",
            "Add two numbers together.",
            ints(),
            |p: IntPair| {
                p.a.checked_add(p.b)
                    .ok_or_else(|| ToolError::new("Integer overflow"))
            },
        ))
        .procedure(Procedure::from_fn(
            "divide_numbers",
            "Divide a by b.",
            ParamSchema::new()
                .required("a", ParamKind::Number)
                .required("b", ParamKind::Number),
            |p: FloatPair| {
                if p.b == 0.0 {
                    return Err(ToolError::new("Cannot divide by zero"));
                }
                Ok(p.a / p.b)
            },
        ))
        .procedure(Procedure::from_async_fn(
            "sleep",
            "Wait for ms milliseconds, then return ms.",
            ParamSchema::new().required("ms", ParamKind::Integer),
            |d: Delay| async move {
                tokio::time::sleep(Duration::from_millis(d.ms)).await;
                Ok(d.ms)
            },
        ))
        .build()
        .unwrap()
}

async fn start(keep_alive: Duration) -> ServerHandle {
    let config = ServerConfig {
        keep_alive,
        ..ServerConfig::default()
    };
    start_server(config, test_registry()).await.unwrap()
}

fn sse_url(server: &ServerHandle) -> String {
    format!("http://{}/sse", server.addr())
}

async fn connect(server: &ServerHandle) -> McpClient {
    McpClient::connect(&sse_url(server)).await.unwrap()
}

/// Poll `check` until it holds or `limit` elapses.
async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

type ByteStream = Pin<Box<dyn futures::Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// A session driven over raw HTTP, without the correlator.
struct RawSession {
    http: reqwest::Client,
    body: ByteStream,
    decoder: SseDecoder,
    queued: Vec<SseEvent>,
    endpoint: String,
    base: String,
}

impl RawSession {
    async fn open(server: &ServerHandle) -> Self {
        let http = reqwest::Client::new();
        let base = format!("http://{}", server.addr());
        let response = http.get(format!("{}/sse", base)).send().await.unwrap();
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );

        let mut session = Self {
            http,
            body: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::new(),
            queued: Vec::new(),
            endpoint: String::new(),
            base,
        };
        let first = session.next_event().await;
        assert_eq!(first.event, "endpoint");
        assert!(first.data.starts_with("/messages/?session_id="));
        session.endpoint = first.data;
        session
    }

    fn session_id(&self) -> SessionId {
        let raw = self.endpoint.rsplit('=').next().unwrap();
        SessionId::parse(raw).unwrap()
    }

    async fn next_event(&mut self) -> SseEvent {
        loop {
            if !self.queued.is_empty() {
                return self.queued.remove(0);
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.body.next())
                .await
                .expect("timed out waiting for an event")
                .expect("stream ended")
                .unwrap();
            self.queued.extend(self.decoder.feed(chunk.as_ref()).unwrap());
        }
    }

    async fn next_message(&mut self) -> Value {
        let event = self.next_event().await;
        assert_eq!(event.event, "message");
        serde_json::from_str(&event.data).unwrap()
    }

    async fn post(&self, body: Value) -> (u16, Option<Value>) {
        let response = self
            .http
            .post(format!("{}{}", self.base, self.endpoint))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        let body = response.json::<Value>().await.ok();
        (status, body)
    }
}

fn tool_call(id: Value, name: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {"name": name, "arguments": arguments}
    })
}

#[tokio::test]
async fn test_calculations_round_trip() {
    let server = start(Duration::from_secs(15)).await;
    let client = connect(&server).await;

    let sum = client
        .call_text("add_numbers", json!({"a": 15, "b": 27}))
        .await
        .unwrap();
    assert_eq!(sum, "42");

    let quotient = client
        .call_text("divide_numbers", json!({"a": 100, "b": 4}))
        .await
        .unwrap();
    assert_eq!(quotient, "25.0");

    let err = client
        .call("divide_numbers", json!({"a": 1, "b": 0}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Tool { ref message } if message == "Cannot divide by zero"));

    // The session is still usable after a domain failure.
    let sum = client
        .call_text("add_numbers", json!({"a": -5, "b": 5}))
        .await
        .unwrap();
    assert_eq!(sum, "0");
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_wire_format_of_results() {
    let server = start(Duration::from_secs(15)).await;
    let mut session = RawSession::open(&server).await;

    let (status, _) = session
        .post(tool_call(json!(1), "add_numbers", json!({"a": 15, "b": 27})))
        .await;
    assert_eq!(status, 202);

    let message = session.next_message().await;
    assert_eq!(
        message,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"content": [{"type": "text", "text": "42"}], "isError": false}
        })
    );

    session
        .post(tool_call(json!("z"), "divide_numbers", json!({"a": 1, "b": 0})))
        .await;
    let message = session.next_message().await;
    assert_eq!(message["id"], "z");
    assert_eq!(message["error"]["code"], -32003);
    assert_eq!(message["error"]["message"], "Cannot divide by zero");
    assert!(message.get("result").is_none());
}

#[tokio::test]
async fn test_concurrent_calls_resolve_out_of_order() {
    let server = start(Duration::from_secs(15)).await;
    let client = connect(&server).await;

    let slow = async {
        let out = client.call_text("sleep", json!({"ms": 300})).await;
        (out, Instant::now())
    };
    let fast = async {
        let out = client.call_text("sleep", json!({"ms": 10})).await;
        (out, Instant::now())
    };
    let ((slow_out, slow_done), (fast_out, fast_done)) = tokio::join!(slow, fast);

    assert_eq!(slow_out.unwrap(), "300");
    assert_eq!(fast_out.unwrap(), "10");
    assert!(fast_done < slow_done);
}

#[tokio::test]
async fn test_results_stream_in_completion_order() {
    let server = start(Duration::from_secs(15)).await;
    let mut session = RawSession::open(&server).await;

    session
        .post(tool_call(json!(1), "sleep", json!({"ms": 300})))
        .await;
    session
        .post(tool_call(json!(2), "sleep", json!({"ms": 10})))
        .await;

    assert_eq!(session.next_message().await["id"], 2);
    assert_eq!(session.next_message().await["id"], 1);
}

#[tokio::test]
async fn test_duplicate_id_rejected_while_pending() {
    let server = start(Duration::from_secs(15)).await;
    let mut session = RawSession::open(&server).await;

    let (status, _) = session
        .post(tool_call(json!(7), "sleep", json!({"ms": 200})))
        .await;
    assert_eq!(status, 202);

    let (status, body) = session
        .post(tool_call(json!(7), "add_numbers", json!({"a": 1, "b": 2})))
        .await;
    assert_eq!(status, 400);
    let body = body.unwrap();
    assert_eq!(body["error"]["code"], -32002);
    assert_eq!(body["id"], 7);

    // The first call still resolves, and only once.
    let message = session.next_message().await;
    assert_eq!(message["id"], 7);
    assert_eq!(message["result"]["content"][0]["text"], "200");

    // Once resolved, the id is free again.
    let (status, _) = session
        .post(tool_call(json!(7), "add_numbers", json!({"a": 1, "b": 2})))
        .await;
    assert_eq!(status, 202);
    assert_eq!(
        session.next_message().await["result"]["content"][0]["text"],
        "3"
    );
}

#[tokio::test]
async fn test_rejections_produce_no_result_event() {
    let server = start(Duration::from_secs(15)).await;
    let mut session = RawSession::open(&server).await;

    let (status, body) = session
        .post(tool_call(json!(1), "no_such_tool", json!({})))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body.unwrap()["error"]["code"], -32601);

    let (status, body) = session
        .post(tool_call(json!(2), "add_numbers", json!({"a": "x", "b": 2})))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body.unwrap()["error"]["code"], -32602);

    let (status, body) = session
        .post(json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body.unwrap()["error"]["code"], -32601);

    // The next event on the stream belongs to the next accepted call.
    session
        .post(json!({"jsonrpc": "2.0", "id": 4, "method": "ping"}))
        .await;
    let message = session.next_message().await;
    assert_eq!(message["id"], 4);
    assert_eq!(message["result"], json!({}));
}

#[tokio::test]
async fn test_call_without_id_is_rejected() {
    let server = start(Duration::from_secs(15)).await;
    let mut session = RawSession::open(&server).await;

    let (status, body) = session
        .post(json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "add_numbers", "arguments": {"a": 1, "b": 2}}
        }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body.unwrap()["error"]["code"], -32600);

    let (status, _) = session
        .post(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;
    assert_eq!(status, 202);

    session
        .post(json!({"jsonrpc": "2.0", "id": 9, "method": "ping"}))
        .await;
    assert_eq!(session.next_message().await["id"], 9);
}

#[tokio::test]
async fn test_integer_valued_floats_accepted() {
    let server = start(Duration::from_secs(15)).await;
    let client = connect(&server).await;

    let sum = client
        .call_text("add_numbers", json!({"a": 15.0, "b": 27}))
        .await
        .unwrap();
    assert_eq!(sum, "42");
}

#[tokio::test]
async fn test_client_sees_typed_rejections() {
    let server = start(Duration::from_secs(15)).await;
    let client = connect(&server).await;

    let err = client.call("no_such_tool", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::UnknownProcedure { ref name } if name == "no_such_tool"));

    let err = client
        .call("add_numbers", json!({"a": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::InvalidArguments { .. }));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let server = start(Duration::from_secs(15)).await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!(
            "http://{}/messages/?session_id={}",
            server.addr(),
            SessionId::generate()
        ))
        .json(&tool_call(json!(1), "add_numbers", json!({"a": 1, "b": 2})))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32001);
}

#[tokio::test]
async fn test_second_stream_for_live_session_is_rejected() {
    let server = start(Duration::from_secs(15)).await;
    let session = RawSession::open(&server).await;

    let response = reqwest::Client::new()
        .get(format!(
            "http://{}/sse?session_id={}",
            server.addr(),
            session.session_id()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
    assert_eq!(server.sessions().len(), 1);
}

#[tokio::test]
async fn test_closing_session_abandons_pending_calls() {
    let server = start(Duration::from_secs(15)).await;
    let client = connect(&server).await;
    let session_id = SessionId::parse(&client.session_id().unwrap()).unwrap();

    let calls = futures::future::join_all(
        (0..3).map(|_| client.call("sleep", json!({"ms": 5_000}))),
    );
    let closer = async {
        let session = server.sessions().lookup(&session_id).unwrap();
        assert!(eventually(Duration::from_secs(5), || session.pending_count() == 3).await);
        let abandoned = server.sessions().close_session(&session_id);
        assert_eq!(abandoned.len(), 3);
        assert_eq!(session.pending_count(), 0);
    };
    let (outcomes, ()) = tokio::join!(calls, closer);

    assert_eq!(outcomes.len(), 3);
    for outcome in outcomes {
        assert!(outcome.unwrap_err().is_abandoned());
    }
    assert!(server.sessions().is_empty());
    assert!(eventually(Duration::from_secs(5), || !client.is_connected()).await);
}

#[tokio::test]
async fn test_client_disconnect_closes_server_session() {
    let server = start(Duration::from_millis(50)).await;
    let mut client = connect(&server).await;
    assert_eq!(server.sessions().len(), 1);

    client.disconnect();
    assert!(!client.is_connected());
    let err = client
        .call("add_numbers", json!({"a": 1, "b": 2}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::ConnectionLost));

    assert!(eventually(Duration::from_secs(5), || server.sessions().is_empty()).await);
}

#[tokio::test]
async fn test_call_timeout_affects_only_that_call() {
    let server = start(Duration::from_secs(15)).await;
    let config = ClientConfig {
        call_timeout: Some(Duration::from_millis(100)),
        ..ClientConfig::default()
    };
    let client = McpClient::connect_with_config(&sse_url(&server), config)
        .await
        .unwrap();

    let (slow, fast) = tokio::join!(
        client.call("sleep", json!({"ms": 1_000})),
        client.call_text("sleep", json!({"ms": 10})),
    );
    assert!(matches!(slow, Err(McpError::Timeout(_))));
    assert_eq!(fast.unwrap(), "10");
    assert_eq!(client.pending_count(), 0);

    // The late result for the timed-out call is discarded quietly.
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(client.is_connected());
    let sum = client
        .call_text("add_numbers", json!({"a": 2, "b": 2}))
        .await
        .unwrap();
    assert_eq!(sum, "4");
}

#[tokio::test]
async fn test_shutdown_abandons_pending_calls() {
    let mut server = start(Duration::from_secs(15)).await;
    let client = connect(&server).await;

    let (outcome, ()) = tokio::join!(client.call("sleep", json!({"ms": 5_000})), async {
        assert!(eventually(Duration::from_secs(5), || client.pending_count() == 1).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();
    });

    assert!(outcome.unwrap_err().is_abandoned());
    assert!(server.sessions().is_empty());
}

#[tokio::test]
async fn test_initialize_and_list_tools() {
    let server = start(Duration::from_secs(15)).await;
    let client = connect(&server).await;

    let init = client.initialize().await.unwrap();
    assert_eq!(init["protocolVersion"], "2024-11-05");
    assert_eq!(init["serverInfo"]["name"], "calculator-server");
    assert!(init["capabilities"]["tools"].is_object());

    let tools = client.list_tools().await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["add_numbers", "divide_numbers", "sleep"]);
    assert_eq!(tools[0].input_schema["required"], json!(["a", "b"]));
    assert_eq!(
        tools[0].input_schema["properties"]["a"]["type"],
        "integer"
    );
}

#[tokio::test]
async fn test_connect_fails_without_endpoint_event() {
    let server = start(Duration::from_secs(15)).await;
    let err = McpClient::connect(&format!("http://{}/health", server.addr()))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, McpError::Connection { .. }));
}

#[tokio::test]
async fn test_health_counts_sessions() {
    let server = start(Duration::from_secs(15)).await;
    let _a = connect(&server).await;
    let _b = connect(&server).await;

    let health: Value = reqwest::get(format!("http://{}/health", server.addr()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({"status": "ok", "sessions": 2}));
}
