#![deny(unsafe_code)]

//! Transport side of the chat client: decoding the answer service's event stream,
//! replaying one-shot answers as a simulated stream, and the HTTP client itself.

mod error;
mod event;
mod handle;
mod reveal;
mod service;
pub mod sse;

pub use error::{FrameError, StreamError, StreamResult};
pub use event::{AnswerPayload, Citation, ProtocolEvent, RawSource, RawSourceMetadata};
pub use handle::{
    AnswerEventStream, AnswerStreamHandle, BoxFuture, EventSink, StreamItem, StreamWorker,
    make_event_stream,
};
pub use reveal::{DEFAULT_REVEAL_DELAY, RevealDriver};
pub use service::{
    AnswerService, DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT, HttpAnswerService, QUERY_PATH,
    STREAM_QUERY_PATH, ServiceConfig, reveal_answer,
};
pub use sse::{EventKind, FrameDecoder, decode_stream};
