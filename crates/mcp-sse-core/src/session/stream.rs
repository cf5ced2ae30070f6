//! Per-session server→client push channel.
//!
//! A [`StreamChannel`] is the producer half and stays with its session; the
//! [`StreamReceiver`] is handed to whoever serves the stream (the SSE
//! response body). Events are delivered in publish order, each at most once.
//! Once either side goes away the channel is dead for good.

use crate::config::TransportConfig;
use crate::error::{McpError, Result};
use crate::protocol::JsonRpcResponse;
use futures::Stream;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// One outbound event on a session stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The request address the client must POST to. Always the first event.
    Endpoint(String),
    /// A JSON-RPC response (Result Event).
    Message(JsonRpcResponse),
}

impl StreamEvent {
    /// SSE `event:` field for this event.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::Endpoint(_) => TransportConfig::ENDPOINT_EVENT,
            StreamEvent::Message(_) => TransportConfig::MESSAGE_EVENT,
        }
    }

    /// SSE `data:` payload for this event.
    pub fn data(&self) -> Result<String> {
        match self {
            StreamEvent::Endpoint(url) => Ok(url.clone()),
            StreamEvent::Message(response) => Ok(serde_json::to_string(response)?),
        }
    }
}

/// Create a connected producer/consumer pair.
pub fn stream_channel() -> (StreamChannel, StreamReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        StreamChannel {
            tx: Mutex::new(Some(tx)),
        },
        StreamReceiver { rx },
    )
}

/// Producer half of a session stream.
#[derive(Debug)]
pub struct StreamChannel {
    tx: Mutex<Option<mpsc::UnboundedSender<StreamEvent>>>,
}

impl StreamChannel {
    /// Append an event for the connected consumer.
    ///
    /// Fails with [`McpError::StreamClosed`] when the channel was closed or
    /// the consumer is gone; the event is dropped in that case.
    pub fn publish(&self, event: StreamEvent) -> Result<()> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(event).map_err(|_| McpError::StreamClosed),
            None => Err(McpError::StreamClosed),
        }
    }

    /// Stop delivery. A consumer blocked in `recv` sees end-of-stream after
    /// draining what was already published. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    /// True once closed locally or once the consumer has been dropped.
    pub fn is_closed(&self) -> bool {
        match self.tx.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}

/// Consumer half of a session stream.
#[derive(Debug)]
pub struct StreamReceiver {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl StreamReceiver {
    /// Next event in publish order, or `None` at end-of-stream.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

impl Stream for StreamReceiver {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
