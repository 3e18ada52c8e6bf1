use citechat_stream::Citation;
use tokio::sync::{broadcast, watch};

use crate::message::{Message, MessageId, MessageStatus, Role};

pub const APOLOGY_TEXT: &str = "I apologize, but I encountered an error while processing your question. Please try again or contact support if the issue persists.";
pub const CANCELLED_TEXT: &str = "The answer was stopped before it finished.";
/// Longest service-provided error text that is shown verbatim.
pub const SERVICE_NOTICE_MAX_CHARS: usize = 300;
const CHANGE_CAPACITY: usize = 256;

/// What a failed assistant message tells the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureNotice {
    /// Fixed apology. Never carries internal error detail.
    Apology,
    /// Error text sent by the answer service itself.
    Service(String),
    /// The user stopped the answer.
    Cancelled,
}

impl FailureNotice {
    pub fn text(&self) -> String {
        match self {
            Self::Apology => APOLOGY_TEXT.to_string(),
            Self::Service(message) if is_displayable(message) => message.trim().to_string(),
            Self::Service(_) => APOLOGY_TEXT.to_string(),
            Self::Cancelled => CANCELLED_TEXT.to_string(),
        }
    }
}

fn is_displayable(message: &str) -> bool {
    let message = message.trim();
    !message.is_empty()
        && message.chars().count() <= SERVICE_NOTICE_MAX_CHARS
        && !message
            .chars()
            .any(|character| character.is_control() && character != '\n')
}

/// Rejection reason for an illegal transcript transition. Nothing is mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptRejection {
    AlreadyStreaming {
        active: MessageId,
    },
    UnknownMessage {
        id: MessageId,
    },
    NotStreaming {
        id: MessageId,
        status: MessageStatus,
    },
}

pub type TranscriptResult<T> = Result<T, TranscriptRejection>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Appended,
    Updated,
    Sealed,
}

/// Snapshot of one message right after a successful transcript operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptChange {
    pub revision: u64,
    pub kind: ChangeKind,
    pub message: Message,
}

/// Ordered conversation plus the single in-progress assistant message.
///
/// At most one message is `Streaming` at any time, and terminal messages are never
/// mutated again.
pub struct Transcript {
    messages: Vec<Message>,
    streaming: Option<MessageId>,
    revision: u64,
    changes: broadcast::Sender<TranscriptChange>,
    answering: watch::Sender<bool>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        let (answering, _) = watch::channel(false);
        Self {
            messages: Vec::new(),
            streaming: None,
            revision: 0,
            changes,
            answering,
        }
    }

    /// Seeds a complete assistant greeting. Blank text leaves the transcript empty.
    pub fn with_greeting(mut self, greeting: &str) -> Self {
        let greeting = greeting.trim();
        if !greeting.is_empty() {
            self.push(Message::new(
                Role::Assistant,
                greeting,
                MessageStatus::Complete,
            ));
        }
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn streaming_message(&self) -> Option<&Message> {
        self.streaming.and_then(|id| self.get(id))
    }

    pub fn is_answering(&self) -> bool {
        self.streaming.is_some()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptChange> {
        self.changes.subscribe()
    }

    pub fn watch_answering(&self) -> watch::Receiver<bool> {
        self.answering.subscribe()
    }

    /// Appends a complete user message. Blank input is ignored.
    pub fn append_user_message(&mut self, text: &str) -> Option<MessageId> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        Some(self.push(Message::user(text)))
    }

    /// Opens the assistant message that the next answer streams into.
    pub fn begin_bot_message(&mut self) -> TranscriptResult<MessageId> {
        if let Some(active) = self.streaming {
            return Err(self.reject(TranscriptRejection::AlreadyStreaming { active }));
        }

        let id = self.push(Message::assistant_streaming());
        self.set_streaming(Some(id));
        tracing::debug!(message_id = %id, "assistant message opened");
        Ok(id)
    }

    /// Replaces the streaming message's text with the cumulative answer so far.
    pub fn apply_chunk(&mut self, id: MessageId, text: impl Into<String>) -> TranscriptResult<()> {
        let index = self.streaming_index(id)?;
        self.messages[index].text = text.into();
        self.publish(ChangeKind::Updated, index);
        Ok(())
    }

    pub fn seal_complete(
        &mut self,
        id: MessageId,
        final_text: impl Into<String>,
        citations: Vec<Citation>,
    ) -> TranscriptResult<()> {
        let index = self.streaming_index(id)?;
        let message = &mut self.messages[index];
        message.text = final_text.into();
        message.citations = citations;
        message.status = MessageStatus::Complete;
        tracing::info!(
            message_id = %id,
            answer_len = message.text.len(),
            citation_count = message.citations.len(),
            "answer completed"
        );

        self.set_streaming(None);
        self.publish(ChangeKind::Sealed, index);
        Ok(())
    }

    /// Fails the streaming message, keeping whatever text already arrived.
    pub fn seal_failed(&mut self, id: MessageId, notice: FailureNotice) -> TranscriptResult<()> {
        let index = self.streaming_index(id)?;
        let message = &mut self.messages[index];
        let partial = std::mem::replace(&mut message.text, notice.text());
        if !partial.is_empty() {
            message.interrupted_text = Some(partial);
        }
        message.status = MessageStatus::Failed;
        tracing::info!(message_id = %id, notice = ?notice, "answer failed");

        self.set_streaming(None);
        self.publish(ChangeKind::Sealed, index);
        Ok(())
    }

    /// Appends a failed assistant message for a question that never reached the service.
    pub fn append_failed(&mut self, notice: FailureNotice) -> MessageId {
        self.push(Message::new(
            Role::Assistant,
            notice.text(),
            MessageStatus::Failed,
        ))
    }

    fn streaming_index(&self, id: MessageId) -> TranscriptResult<usize> {
        let Some(index) = self.messages.iter().position(|message| message.id == id) else {
            return Err(self.reject(TranscriptRejection::UnknownMessage { id }));
        };

        let status = self.messages[index].status;
        if status != MessageStatus::Streaming {
            return Err(self.reject(TranscriptRejection::NotStreaming { id, status }));
        }

        Ok(index)
    }

    fn reject(&self, rejection: TranscriptRejection) -> TranscriptRejection {
        tracing::warn!(rejection = ?rejection, "transcript transition rejected");
        rejection
    }

    fn push(&mut self, message: Message) -> MessageId {
        let id = message.id;
        self.messages.push(message);
        self.publish(ChangeKind::Appended, self.messages.len() - 1);
        id
    }

    fn set_streaming(&mut self, streaming: Option<MessageId>) {
        self.streaming = streaming;
        let answering = streaming.is_some();
        self.answering.send_if_modified(|current| {
            let changed = *current != answering;
            *current = answering;
            changed
        });
    }

    fn publish(&mut self, kind: ChangeKind, index: usize) {
        self.revision += 1;
        // No receivers is fine; the renderer may not be attached yet.
        let _ = self.changes.send(TranscriptChange {
            revision: self.revision,
            kind,
            message: self.messages[index].clone(),
        });
    }
}
