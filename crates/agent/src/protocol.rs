//! Streaming body/JSON protocol.
//!
//! A model answer is human-readable body text, then a line holding only
//! [`END_OF_BODY`], then exactly one line of JSON:
//!
//! ```text
//! Let me look that up.
//! <<END-OF-BODY>>
//! {"action":"MemorySearch"}
//! ```
//!
//! [`BodyJsonParser`] consumes the answer fragment by fragment as it
//! streams in. Body text is released as soon as it provably precedes the
//! sentinel, so the client sees it live, while the JSON payload is only
//! recovered once the stream has ended. Fragment boundaries are arbitrary:
//! a sentinel split over any number of fragments is still detected, because
//! the parser holds back every buffered suffix that could still grow into it.

use reflexa_core::error::ParseError;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// The sentinel line separating body from payload.
pub const END_OF_BODY: &str = "<<END-OF-BODY>>";

/// Incremental splitter for body/JSON answers.
#[derive(Debug, Default)]
pub struct BodyJsonParser {
    /// Received but not yet released text
    pending: String,
    /// Everything released so far
    body: String,
    /// Text after the sentinel (only filled once the sentinel is seen)
    payload: String,
    sentinel_seen: bool,
}

impl BodyJsonParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment. Returns the body text that can be forwarded now.
    ///
    /// Nothing after the sentinel is ever returned.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        if self.sentinel_seen {
            self.payload.push_str(fragment);
            return None;
        }

        self.pending.push_str(fragment);

        if let Some(at) = self.pending.find(END_OF_BODY) {
            let rest = self.pending.split_off(at);
            self.payload.push_str(&rest[END_OF_BODY.len()..]);
            self.sentinel_seen = true;

            let mut released = std::mem::take(&mut self.pending);
            strip_line_break(&mut released);
            return self.release(released);
        }

        let keep = held_back_len(&self.pending);
        let cut = self.pending.len() - keep;
        let tail = self.pending.split_off(cut);
        let released = std::mem::replace(&mut self.pending, tail);
        self.release(released)
    }

    fn release(&mut self, text: String) -> Option<String> {
        if text.is_empty() {
            return None;
        }
        self.body.push_str(&text);
        Some(text)
    }

    /// Whether the sentinel line has been received.
    pub fn is_complete(&self) -> bool {
        self.sentinel_seen
    }

    /// All body text released so far.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Finish the stream and return the trimmed JSON line.
    ///
    /// The payload must fit on one line; pretty-printed JSON is rejected.
    pub fn end(&self) -> Result<String, ParseError> {
        if !self.sentinel_seen {
            return Err(ParseError::MissingSentinel);
        }

        let json = self.payload.trim();
        if json.contains('\n') {
            return Err(ParseError::InvalidJson {
                reason: "payload spans more than one line".to_string(),
            });
        }
        serde_json::from_str::<serde_json::Value>(json).map_err(|e| ParseError::InvalidJson {
            reason: e.to_string(),
        })?;
        Ok(json.to_string())
    }

    /// Finish the stream and deserialize the payload into `T`.
    pub fn end_as<T: DeserializeOwned>(&self) -> Result<T, ParseError> {
        let json = self.end()?;
        let value: serde_json::Value =
            serde_json::from_str(&json).map_err(|e| ParseError::InvalidJson {
                reason: e.to_string(),
            })?;
        serde_json::from_value(value).map_err(|e| ParseError::Schema {
            reason: e.to_string(),
        })
    }
}

/// Length of the buffered suffix that must stay unreleased: the longest
/// suffix that is a proper prefix of the sentinel, plus the `\n` right
/// before it.
fn held_back_len(buffer: &str) -> usize {
    let bytes = buffer.as_bytes();
    let sentinel = END_OF_BODY.as_bytes();

    let prefix = (1..sentinel.len())
        .rev()
        .find(|&k| bytes.ends_with(&sentinel[..k]))
        .unwrap_or(0);

    let before = &bytes[..bytes.len() - prefix];
    prefix + usize::from(before.ends_with(b"\n"))
}

/// The `\n` before the sentinel belongs to the sentinel line. Anything
/// before it, a `\r` included, is body text.
fn strip_line_break(text: &mut String) {
    if text.ends_with('\n') {
        text.truncate(text.len() - 1);
    }
}

/// Produce the canonical wire form: `body`, the sentinel line, compact JSON.
pub fn encode<T: Serialize>(body: &str, payload: &T) -> Result<String, ParseError> {
    let json = serde_json::to_string(payload).map_err(|e| ParseError::Schema {
        reason: e.to_string(),
    })?;
    Ok(format!("{body}\n{END_OF_BODY}\n{json}"))
}

/// Split a complete, non-streamed answer into `(body, json)`.
pub fn decode(text: &str) -> Result<(String, String), ParseError> {
    let mut parser = BodyJsonParser::new();
    parser.push(text);
    let json = parser.end()?;
    Ok((parser.body, json))
}
