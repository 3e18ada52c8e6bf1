use std::fmt;

use chrono::{DateTime, Utc};
use citechat_stream::Citation;
use uuid::Uuid;

use crate::citation::{DisplayCitation, normalize_citations};

/// Opaque identifier for one transcript message. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new_v7() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle status for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    /// Created but not yet receiving content.
    Pending,
    Streaming,
    Complete,
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// One entry of the conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    pub citations: Vec<Citation>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    /// Text that had streamed in before the message failed.
    pub interrupted_text: Option<String>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: MessageId::new_v7(),
            role,
            text: text.into(),
            citations: Vec::new(),
            status,
            created_at: Utc::now(),
            interrupted_text: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text, MessageStatus::Complete)
    }

    /// Creates an empty assistant placeholder that is ready for chunks.
    pub fn assistant_streaming() -> Self {
        Self::new(Role::Assistant, String::new(), MessageStatus::Streaming)
    }

    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }

    /// Display-ready citations, recomputed on every call.
    pub fn display_citations(&self) -> Vec<DisplayCitation> {
        normalize_citations(&self.citations)
    }
}
