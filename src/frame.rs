//! Reassembles SSE frames from arbitrarily split byte chunks.
//!
//! Frames are separated by a blank line (`\n\n`). Within a frame:
//! - `event: <type>` names the event
//! - `data: <payload>` carries the payload (repeated lines are joined with `\n`)
//! - lines starting with `:` are comments and ignored

use crate::event::{decode_event, SseEvent};

/// One complete SSE frame.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    /// Parses the text of one frame (without its trailing delimiter).
    pub fn parse(block: &str) -> Self {
        let mut frame = Self::default();
        let mut data_lines: Vec<&str> = Vec::new();

        for line in block.lines() {
            if line.starts_with(':') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("event:") {
                frame.event = rest.trim().to_owned();
            } else if let Some(rest) = line.strip_prefix("data:") {
                data_lines.push(rest.trim());
            }
        }

        frame.data = data_lines.join("\n");
        frame
    }

    /// Decodes the frame into a typed event, if it is one we understand.
    pub fn to_event(&self) -> Option<SseEvent> {
        decode_event(&self.event, &self.data)
    }
}

/// Accumulates chunk text and yields every complete frame.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    text: String,
    /// Trailing bytes of a UTF-8 sequence split across chunks.
    partial_utf8: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns all frames it completed, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.push_bytes(chunk);
        if self.text.contains('\r') {
            self.text = self.text.replace("\r\n", "\n");
        }

        let mut frames = Vec::new();
        while let Some(end) = self.text.find("\n\n") {
            let block: String = self.text.drain(..end + 2).collect();
            let block = &block[..end];
            if block.trim().is_empty() {
                continue;
            }
            frames.push(SseFrame::parse(block));
        }
        frames
    }

    /// Takes whatever is left at end of stream as a final frame.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.partial_utf8.is_empty() {
            let bytes = std::mem::take(&mut self.partial_utf8);
            self.text.push_str(&String::from_utf8_lossy(&bytes));
        }
        let rest = std::mem::take(&mut self.text);
        if rest.trim().is_empty() {
            return None;
        }
        Some(SseFrame::parse(&rest))
    }

    /// Drops buffered state, e.g. before reconnecting.
    pub fn reset(&mut self) {
        self.text.clear();
        self.partial_utf8.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.partial_utf8.is_empty()
    }

    fn push_bytes(&mut self, chunk: &[u8]) {
        let owned;
        let mut bytes = chunk;
        if !self.partial_utf8.is_empty() {
            let mut joined = std::mem::take(&mut self.partial_utf8);
            joined.extend_from_slice(chunk);
            owned = joined;
            bytes = &owned;
        }

        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    self.text.push_str(text);
                    return;
                }
                Err(err) => {
                    let (valid, rest) = bytes.split_at(err.valid_up_to());
                    // `valid` is well-formed by construction.
                    self.text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        // Incomplete sequence at the end: wait for the next chunk.
                        None => {
                            self.partial_utf8.extend_from_slice(rest);
                            return;
                        }
                        Some(len) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[len..];
                        }
                    }
                }
            }
        }
    }
}
