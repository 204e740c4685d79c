//! Incremental decoding of the backend wire formats.
//!
//! Both backends stream over chunked HTTP bodies: the local server as
//! newline-delimited JSON, the cloud endpoint as SSE `data:` lines. Chunk
//! boundaries fall anywhere, mid-line or mid-codepoint, so decoding is
//! incremental: bytes go in, whole lines come out, partial tail bytes stay
//! buffered until the next chunk (or [`LineDecoder::flush`]).

use crate::error::{Result, TellerError};
use serde::Deserialize;

/// SSE sentinel the cloud endpoint sends after its last data line.
pub const SSE_DONE: &str = "[DONE]";

/// Splits an incoming byte stream into complete lines.
///
/// Lines are split on `\n`; a trailing `\r` is stripped so CRLF transports
/// decode identically. Splitting happens on raw bytes, so a UTF-8 codepoint
/// broken across chunks is reassembled before the line is decoded.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns every line completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(take_line(&mut self.buffer));
            } else {
                self.buffer.push(byte);
            }
        }
        lines
    }

    /// Drain any buffered partial line after the transport closed.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(take_line(&mut self.buffer))
    }
}

fn take_line(buffer: &mut Vec<u8>) -> String {
    if buffer.last() == Some(&b'\r') {
        buffer.pop();
    }
    let line = String::from_utf8_lossy(buffer).into_owned();
    buffer.clear();
    line
}

/// One decoded generate-stream chunk.
///
/// The local server emits these as NDJSON lines; the cloud endpoint wraps
/// the same shape in SSE `data:` payloads. A final chunk carries
/// `done: true` (usually with an empty `response`); an `error` member means
/// the backend aborted the generation.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Decode one wire line into a [`GenerateChunk`].
///
/// # Errors
///
/// Returns [`TellerError::Backend`] when the line is not valid JSON.
pub fn decode_chunk(line: &str) -> Result<GenerateChunk> {
    serde_json::from_str(line)
        .map_err(|e| TellerError::Backend(format!("unparseable stream chunk {line:?}: {e}")))
}

/// Extract the payload of an SSE `data:` line.
///
/// Returns `None` for every other SSE field (`event:`, `id:`, comments) and
/// for blank separator lines. A single leading space after the colon is
/// stripped per the SSE spec.
#[must_use]
pub fn sse_data(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    // ── LineDecoder ──────────────────────────────────────────────────────

    #[test]
    fn push_returns_complete_lines() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"{\"response\":\"a\"}\n{\"response\":\"b\"}\n");
        assert_eq!(lines, vec!["{\"response\":\"a\"}", "{\"response\":\"b\"}"]);
    }

    #[test]
    fn partial_line_is_buffered() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"{\"respon").is_empty());
        let lines = decoder.push(b"se\":\"x\"}\n");
        assert_eq!(lines, vec!["{\"response\":\"x\"}"]);
    }

    #[test]
    fn crlf_is_stripped() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"data: one\r\ndata: two\r\n");
        assert_eq!(lines, vec!["data: one", "data: two"]);
    }

    #[test]
    fn utf8_codepoint_split_across_chunks() {
        let mut decoder = LineDecoder::new();
        let bytes = "{\"response\":\"café\"}\n".as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() - 3);

        assert!(decoder.push(head).is_empty());
        let lines = decoder.push(tail);
        assert_eq!(lines, vec!["{\"response\":\"café\"}"]);
    }

    #[test]
    fn flush_drains_trailing_partial() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"tail without newline");
        assert_eq!(decoder.flush().as_deref(), Some("tail without newline"));
        assert_eq!(decoder.flush(), None);
    }

    #[test]
    fn empty_lines_are_preserved() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"data: x\n\ndata: y\n");
        assert_eq!(lines, vec!["data: x", "", "data: y"]);
    }

    // ── GenerateChunk ────────────────────────────────────────────────────

    #[test]
    fn decode_token_chunk() {
        let chunk = decode_chunk(r#"{"model":"llama3.2","response":"Hello","done":false}"#).unwrap();
        assert_eq!(chunk.response, "Hello");
        assert!(!chunk.done);
        assert!(chunk.error.is_none());
    }

    #[test]
    fn decode_final_chunk() {
        let chunk = decode_chunk(r#"{"response":"","done":true,"total_duration":81000}"#).unwrap();
        assert!(chunk.done);
        assert!(chunk.response.is_empty());
    }

    #[test]
    fn decode_error_chunk() {
        let chunk = decode_chunk(r#"{"error":"model not found"}"#).unwrap();
        assert_eq!(chunk.error.as_deref(), Some("model not found"));
    }

    #[test]
    fn decode_rejects_non_json() {
        let err = decode_chunk("<html>bad gateway</html>").unwrap_err();
        assert_eq!(err.code(), "BACKEND_ERROR");
    }

    // ── sse_data ─────────────────────────────────────────────────────────

    #[test]
    fn sse_data_strips_prefix_and_space() {
        assert_eq!(sse_data("data: {\"response\":\"x\"}"), Some("{\"response\":\"x\"}"));
        assert_eq!(sse_data("data:{\"response\":\"x\"}"), Some("{\"response\":\"x\"}"));
    }

    #[test]
    fn sse_data_ignores_other_fields() {
        assert_eq!(sse_data("event: message"), None);
        assert_eq!(sse_data("id: 7"), None);
        assert_eq!(sse_data(": keepalive"), None);
        assert_eq!(sse_data(""), None);
    }

    #[test]
    fn sse_done_sentinel() {
        assert_eq!(sse_data("data: [DONE]"), Some(SSE_DONE));
    }
}
