//! Incremental Server-Sent Events decoder used by the client.
//!
//! Frames look like:
//!
//! ```text
//! event: endpoint
//! data: /messages/?session_id=0f3c...
//!
//! : keep-alive comment
//!
//! event: message
//! data: {"jsonrpc":"2.0","id":1,"result":{...}}
//!
//! ```
//!
//! Bytes arrive in arbitrary chunks, so the decoder buffers partial lines
//! (including split UTF-8 sequences) until a newline shows up.

use crate::config::TransportConfig;
use crate::error::{McpError, Result};

/// A dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, `"message"` when absent.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a newline.
    scanned: usize,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    id: Option<String>,
    max_event_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(TransportConfig::MAX_MESSAGE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that fails once a pending event grows past `max_event_bytes`.
    pub fn with_limit(max_event_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            event: None,
            data: Vec::new(),
            data_len: 0,
            id: None,
            max_event_bytes,
        }
    }

    /// Feed a chunk and return every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let newline = self.scanned + offset;
            let mut end = newline;
            if end > start && self.buffer[end - 1] == b'\r' {
                end -= 1;
            }
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            start = newline + 1;
            self.scanned = start;
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() + self.data_len > self.max_event_bytes {
            return Err(McpError::Parse {
                message: format!("SSE event exceeds {} bytes", self.max_event_bytes),
            });
        }
        Ok(events)
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data_len += value.len();
                self.data.push(value.to_string());
            }
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        self.data_len = 0;
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_endpoint_then_message() {
        let mut decoder = SseDecoder::new();
        let events = decoder
            .feed(b"event: endpoint\ndata: /messages/?session_id=ab\n\nevent: message\ndata: {\"id\":1}\n\n")
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[0].data, "/messages/?session_id=ab");
        assert_eq!(events[1].event, "message");
        assert_eq!(events[1].data, "{\"id\":1}");
    }

    #[test]
    fn test_handles_arbitrary_chunk_boundaries() {
        let raw = "event: message\r\ndata: {\"text\":\"π≈3.14\"}\r\n\r\n".as_bytes();
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for byte in raw {
            events.extend(decoder.feed(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"text\":\"π≈3.14\"}");
    }

    #[test]
    fn test_ignores_comments_and_joins_multiline_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder
            .feed(b": ping\n\ndata: line one\ndata: line two\nid: 7\n\n")
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "line one\nline two");
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_incomplete_event_is_held_back() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: message\ndata: {}").unwrap().is_empty());
        assert_eq!(decoder.feed(b"\n\n").unwrap().len(), 1);
    }

    #[test]
    fn test_long_line_in_small_chunks() {
        let payload = "x".repeat(10_000);
        let raw = format!("data: {}\n\n", payload);
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for chunk in raw.as_bytes().chunks(7) {
            events.extend(decoder.feed(chunk).unwrap());
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, payload);
        assert_eq!(decoder.scanned, 0);
        assert!(decoder.buffer.is_empty());
    }

    #[test]
    fn test_oversized_event_fails() {
        let mut decoder = SseDecoder::with_limit(64);
        assert!(decoder.feed(&[b'x'; 32]).unwrap().is_empty());
        let err = decoder.feed(&[b'x'; 40]).unwrap_err();
        assert!(matches!(err, McpError::Parse { .. }));

        // Many small data lines count against the same limit.
        let mut decoder = SseDecoder::with_limit(64);
        let mut result = Ok(Vec::new());
        for _ in 0..10 {
            result = decoder.feed(b"data: 0123456789\n");
            if result.is_err() {
                break;
            }
        }
        assert!(result.is_err());
    }
}
