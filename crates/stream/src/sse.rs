//! Incremental decoder for the answer service's server-sent event stream.
//!
//! The service frames each event as a type line paired with a JSON data line:
//!
//! ```text
//! event: chunk
//! data: {"chunk":"Your card earns"}
//!
//! ```
//!
//! A data line without a preceding `event:` line may carry its type inline as an
//! `"event"` or `"type"` field of the payload. Frames that cannot be decoded are
//! logged and skipped; one corrupt frame never ends the stream.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use futures::{Stream, StreamExt, stream};
use serde::Deserialize;
use serde_json::Value;
use snafu::{OptionExt, ResultExt};

use crate::error::{
    EndedWithoutTerminalSnafu, FrameError, InvalidJsonSnafu, MissingEventTypeSnafu,
    MissingFieldSnafu, StreamResult, TransportSnafu, UnknownEventSnafu,
};
use crate::event::{Citation, ProtocolEvent, RawSource};

const DATA_FIELD: &str = "data:";
const EVENT_FIELD: &str = "event:";
const EMPTY_PAYLOAD: &str = "{}";

/// Event types the answer service is known to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Chunk,
    Complete,
    Error,
}

impl EventKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "start" => Some(Self::Start),
            "chunk" => Some(Self::Chunk),
            "complete" => Some(Self::Complete),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Chunk => "chunk",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

#[derive(Deserialize)]
struct ChunkPayload {
    chunk: Option<String>,
}

#[derive(Deserialize)]
struct CompletePayload {
    answer: Option<String>,
    #[serde(default)]
    sources: Vec<RawSource>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    message: Option<String>,
}

/// Line-oriented SSE decoder that tolerates fragments split anywhere,
/// including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    pending_bytes: Vec<u8>,
    pending_event: Option<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw transport bytes and returns every event completed by them.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<ProtocolEvent> {
        self.pending_bytes.extend_from_slice(bytes);
        let text = take_utf8_prefix(&mut self.pending_bytes);
        self.push_str(&text)
    }

    /// Feeds a text fragment and returns every event completed by it.
    pub fn push_str(&mut self, fragment: &str) -> Vec<ProtocolEvent> {
        self.buffer.push_str(fragment);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            if let Some(event) = self.process_line(line.trim_end_matches(['\n', '\r'])) {
                events.push(event);
            }
        }
        events
    }

    /// Flushes whatever is buffered once the transport reports end of data.
    ///
    /// The final line is decoded even without a trailing newline.
    pub fn finish(&mut self) -> Vec<ProtocolEvent> {
        if !self.pending_bytes.is_empty() {
            let tail = std::mem::take(&mut self.pending_bytes);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }

        let mut events = self.push_str("");
        let tail = std::mem::take(&mut self.buffer);
        if let Some(event) = self.process_line(tail.trim_end_matches('\r')) {
            events.push(event);
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<ProtocolEvent> {
        if line.trim().is_empty() {
            self.pending_event = None;
            return None;
        }

        if line.starts_with(':') {
            return None;
        }

        if let Some(name) = line.strip_prefix(EVENT_FIELD) {
            self.pending_event = Some(name.trim().to_string());
            return None;
        }

        let Some(payload) = line.strip_prefix(DATA_FIELD) else {
            tracing::trace!(line, "ignoring unsupported sse field");
            return None;
        };

        let payload = payload.trim();
        if payload == EMPTY_PAYLOAD {
            return None;
        }

        match decode_frame(self.pending_event.as_deref(), payload) {
            Ok(event) => Some(event),
            Err(error) => {
                tracing::warn!(error = %error, payload, "skipping malformed sse frame");
                None
            }
        }
    }
}

fn decode_frame(pending_event: Option<&str>, payload: &str) -> Result<ProtocolEvent, FrameError> {
    let value: Value = serde_json::from_str(payload).context(InvalidJsonSnafu {
        stage: "parse-frame-json",
    })?;

    let name = match pending_event {
        Some(name) => name.to_string(),
        None => inline_event_name(&value).context(MissingEventTypeSnafu {
            stage: "resolve-event-type",
        })?,
    };
    let kind = EventKind::parse(&name).context(UnknownEventSnafu {
        stage: "resolve-event-type",
        name: &name,
    })?;

    match kind {
        EventKind::Start => Ok(ProtocolEvent::Start),
        EventKind::Chunk => {
            let payload: ChunkPayload = serde_json::from_value(value).context(InvalidJsonSnafu {
                stage: "decode-chunk-payload",
            })?;
            let chunk = payload.chunk.context(MissingFieldSnafu {
                stage: "decode-chunk-payload",
                event: kind.as_str(),
                field: "chunk",
            })?;
            Ok(ProtocolEvent::Chunk(chunk))
        }
        EventKind::Complete => {
            let payload: CompletePayload =
                serde_json::from_value(value).context(InvalidJsonSnafu {
                    stage: "decode-complete-payload",
                })?;
            let answer = payload.answer.context(MissingFieldSnafu {
                stage: "decode-complete-payload",
                event: kind.as_str(),
                field: "answer",
            })?;
            Ok(ProtocolEvent::Complete {
                answer,
                citations: payload.sources.into_iter().map(Citation::from).collect(),
            })
        }
        EventKind::Error => {
            let payload: ErrorPayload = serde_json::from_value(value).context(InvalidJsonSnafu {
                stage: "decode-error-payload",
            })?;
            let message = payload
                .message
                .filter(|message| !message.trim().is_empty());
            Ok(ProtocolEvent::Error { message })
        }
    }
}

fn inline_event_name(value: &Value) -> Option<String> {
    value
        .get("event")
        .or_else(|| value.get("type"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Moves the longest decodable prefix out of `bytes`, leaving an incomplete
/// trailing sequence behind. Invalid sequences become U+FFFD.
fn take_utf8_prefix(bytes: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut start = 0;

    loop {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(valid) => {
                text.push_str(valid);
                start = bytes.len();
                break;
            }
            Err(error) => {
                let valid_end = start + error.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&bytes[start..valid_end]));
                match error.error_len() {
                    Some(invalid_len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        start = valid_end + invalid_len;
                    }
                    None => {
                        start = valid_end;
                        break;
                    }
                }
            }
        }
    }

    bytes.drain(..start);
    text
}

struct DecodeState<S> {
    transport: Pin<Box<S>>,
    decoder: FrameDecoder,
    ready: VecDeque<ProtocolEvent>,
    transport_done: bool,
    finished: bool,
}

/// Adapts a raw byte stream into a lazy stream of protocol events.
///
/// The stream ends right after a `Complete` or `Error` event. If the transport ends
/// first, one `EndedWithoutTerminal` error is yielded instead. A transport read error
/// yields one `Transport` error and ends the stream.
pub fn decode_stream<S, B, E>(transport: S) -> impl Stream<Item = StreamResult<ProtocolEvent>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        transport: Box::pin(transport),
        decoder: FrameDecoder::new(),
        ready: VecDeque::new(),
        transport_done: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if let Some(event) = state.ready.pop_front() {
                state.finished = event.is_terminal();
                return Some((Ok(event), state));
            }

            if state.transport_done {
                state.finished = true;
                return Some((
                    EndedWithoutTerminalSnafu {
                        stage: "transport-eof",
                    }
                    .fail(),
                    state,
                ));
            }

            match state.transport.next().await {
                Some(Ok(bytes)) => {
                    let events = state.decoder.push_bytes(bytes.as_ref());
                    state.ready.extend(events);
                }
                Some(Err(error)) => {
                    state.finished = true;
                    return Some((
                        TransportSnafu {
                            stage: "read-transport",
                            message: error.to_string(),
                        }
                        .fail(),
                        state,
                    ));
                }
                None => {
                    state.transport_done = true;
                    let events = state.decoder.finish();
                    state.ready.extend(events);
                }
            }
        }
    })
}
