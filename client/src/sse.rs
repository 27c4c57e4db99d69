#[cfg(test)]
#[path = "sse_test.rs"]
mod tests;

use log::warn;
use serde::Deserialize;

use chatbridge_models::{Role, StreamError, StreamEvent};

const DONE_SENTINEL: &str = "[DONE]";

/// Incremental decoder for the SSE-style wire format: blank-line separated
/// blocks of `event:`/`data:` lines. Raw bytes go in, complete protocol
/// events come out; partial blocks and partial UTF-8 sequences are carried
/// over to the next chunk.
///
/// After a terminal event (`[DONE]`, a server-reported error, or a parse
/// failure on the default `message` event) the decoder is inert and
/// swallows further input. Decode failures on the auxiliary event types
/// surface an error event but do not stop the stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    buffer: String,
    closed: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Feeds one chunk of raw bytes, returning every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.closed {
            return Vec::new();
        }

        let text = self.decode_utf8(chunk);
        self.buffer.push_str(&text);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 2);

            if block.trim().is_empty() {
                continue;
            }
            self.parse_block(&block, &mut events);
            if self.closed {
                break;
            }
        }
        events
    }

    /// Signals upstream end-of-stream. Synthesizes `Done` when no terminal
    /// event was seen.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.closed {
            return None;
        }
        self.closed = true;
        Some(StreamEvent::Done)
    }

    // Appends the chunk to any pending partial sequence and decodes as much
    // as possible; an incomplete trailing sequence is kept for next time.
    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        let mut rest = std::mem::take(&mut self.pending);
        loop {
            match std::str::from_utf8(&rest) {
                Ok(s) => {
                    out.push_str(s);
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(std::str::from_utf8(&rest[..valid]).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            warn!("dropping {} invalid utf-8 bytes from stream", len);
                            rest.drain(..valid + len);
                        }
                        None => {
                            // Incomplete multi-byte sequence at the tail.
                            self.pending = rest[valid..].to_vec();
                            return out;
                        }
                    }
                }
            }
        }
    }

    fn parse_block(&mut self, block: &str, events: &mut Vec<StreamEvent>) {
        let mut event_name = "message";
        let mut data_lines: Vec<&str> = Vec::new();

        for line in block.split('\n') {
            if let Some(name) = line.strip_prefix("event:") {
                event_name = name.trim();
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                data_lines.push(data.strip_prefix(' ').unwrap_or(data));
            }
        }

        // Blocks without data lines carry nothing.
        if data_lines.is_empty() {
            return;
        }
        let data = data_lines.join("\n");

        match event_name {
            "message" => self.parse_message_event(&data, events),
            "status" => parse_payload(&data, events, StreamEvent::Status),
            "tool_use" => parse_payload(&data, events, StreamEvent::ToolUse),
            "tool_result" => parse_payload(&data, events, StreamEvent::ToolResult),
            "result" => parse_payload(&data, events, StreamEvent::Result),
            other => {
                log::trace!("ignoring unknown stream event: {}", other);
            }
        }
    }

    fn parse_message_event(&mut self, data: &str, events: &mut Vec<StreamEvent>) {
        if data == DONE_SENTINEL {
            events.push(StreamEvent::Done);
            self.closed = true;
            return;
        }

        let chunk: CompletionChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(_) => {
                events.push(StreamEvent::Error(StreamError::stream(
                    "failed to parse stream data",
                )));
                self.closed = true;
                return;
            }
        };

        if let Some(error) = chunk.error {
            if let Some(message) = error.message {
                events.push(StreamEvent::Error(StreamError::server(message)));
                self.closed = true;
                return;
            }
        }

        let choices = match chunk.choices {
            Some(choices) => choices,
            None => {
                events.push(StreamEvent::Error(StreamError::stream(
                    "stream data is missing choices",
                )));
                self.closed = true;
                return;
            }
        };

        let delta = choices.into_iter().next().and_then(|choice| choice.delta);
        if let Some(delta) = delta {
            // Empty or unrecognized role strings emit nothing.
            if let Some(role) = delta.role.as_deref().and_then(parse_role) {
                events.push(StreamEvent::Role(role));
            }
            if let Some(content) = delta.content {
                if !content.is_empty() {
                    events.push(StreamEvent::Delta(content));
                }
            }
        }
    }
}

fn parse_role(role: &str) -> Option<Role> {
    match role {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "system" => Some(Role::System),
        _ => None,
    }
}

fn parse_payload<T, F>(data: &str, events: &mut Vec<StreamEvent>, wrap: F)
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(T) -> StreamEvent,
{
    match serde_json::from_str::<T>(data) {
        Ok(payload) => events.push(wrap(payload)),
        Err(_) => {
            events.push(StreamEvent::Error(StreamError::stream(
                "failed to parse event data",
            )));
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    error: Option<ChunkError>,
    #[serde(default)]
    choices: Option<Vec<ChunkChoice>>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}
