//! Server-Sent-Events line handling for the chat relay.
//!
//! Upstream bodies arrive in arbitrary chunks. [`LineReassembler`] is a
//! `tokio_util` decoder that turns those chunks into whole lines, carrying an
//! incomplete tail over to the next read. [`parse_line`] then classifies a
//! line as a JSON frame, the `[DONE]` sentinel, or noise.
//!
//! A partial line still buffered when the upstream closes is dropped rather
//! than flushed. Upstreams are expected to terminate every line; the dropped
//! byte count is logged so a misbehaving upstream shows up in the logs.

use std::io;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::frame::EventFrame;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Splits a byte stream on `\n`, yielding lines without the terminator.
///
/// Splitting happens on raw bytes, so a multi-byte UTF-8 character cut in
/// half by a chunk boundary is reassembled before decoding. A single trailing
/// `\r` is stripped.
#[derive(Debug, Default)]
pub struct LineReassembler {
    // Bytes of the buffer already searched for a newline.
    scanned: usize,
    dropped_bytes: usize,
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes discarded because the stream ended mid-line.
    pub fn dropped_bytes(&self) -> usize {
        self.dropped_bytes
    }
}

impl Decoder for LineReassembler {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let newline = src[self.scanned..].iter().position(|b| *b == b'\n');
        let Some(offset) = newline else {
            self.scanned = src.len();
            return Ok(None);
        };

        let end = self.scanned + offset;
        self.scanned = 0;

        let mut line = src.split_to(end + 1);
        line.truncate(end);
        if line.last() == Some(&b'\r') {
            line.truncate(end - 1);
        }

        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }

        if !src.is_empty() {
            tracing::warn!(
                bytes = src.len(),
                "Upstream closed mid-line; dropping unterminated SSE data"
            );
            self.dropped_bytes += src.len();
            src.clear();
            self.scanned = 0;
        }

        Ok(None)
    }
}

/// What a single reassembled line means to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// A `data: ` line carrying a JSON object.
    Frame(EventFrame),
    /// `data: [DONE]`
    Done,
    /// A `data: ` line whose payload is not valid JSON.
    Malformed { payload: String, error: String },
    /// Anything without the `data: ` prefix (comments, `event:` lines, blanks).
    Ignored,
}

pub fn parse_line(line: &str) -> Line {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Line::Ignored;
    };

    if payload == DONE_SENTINEL {
        return Line::Done;
    }

    match EventFrame::parse(payload) {
        Ok(frame) => Line::Frame(frame),
        Err(e) => Line::Malformed {
            payload: payload.to_string(),
            error: e.to_string(),
        },
    }
}

/// `data: <payload>\n\n`, payload untouched.
pub fn data_frame(payload: &str) -> Bytes {
    Bytes::from(format!("{}{}\n\n", DATA_PREFIX, payload))
}

pub fn done_frame() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// `data: {"error": "<message>"}\n\n`
pub fn error_frame(message: &str) -> Bytes {
    let body = serde_json::json!({ "error": message });
    data_frame(&body.to_string())
}
