#![deny(unsafe_code)]

//! Conversation domain: messages, citation display, the transcript state machine and
//! the exchange that feeds answer events into it.

pub mod citation;
mod exchange;
mod message;
mod session;
mod transcript;

pub use citation::{CitationCategory, DisplayCitation, PREVIEW_CHAR_LIMIT, normalize_citations};
pub use exchange::{Exchange, Flow, apply_event};
pub use message::{Message, MessageId, MessageStatus, Role};
pub use session::{AnswerMode, ChatSession, SubmitOutcome};
pub use transcript::{
    APOLOGY_TEXT, CANCELLED_TEXT, ChangeKind, FailureNotice, SERVICE_NOTICE_MAX_CHARS, Transcript,
    TranscriptChange, TranscriptRejection, TranscriptResult,
};
