use std::fmt;
use std::sync::Arc;

use citechat_stream::{AnswerService, RevealDriver, reveal_answer};
use serde::{Deserialize, Serialize};

use crate::exchange::{Exchange, Flow};
use crate::message::MessageId;
use crate::transcript::{FailureNotice, Transcript};

/// How answers are obtained from the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    /// Server-push stream of cumulative chunks.
    #[default]
    Stream,
    /// One-shot fetch replayed word by word.
    Reveal,
}

impl AnswerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Reveal => "reveal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stream" => Some(Self::Stream),
            "reveal" => Some(Self::Reveal),
            _ => None,
        }
    }
}

impl fmt::Display for AnswerMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The question was sent; the answer streams into this message.
    Dispatched(MessageId),
    Blank,
    /// Another answer is still in flight.
    Busy,
    /// The question could not be sent; this failed message says so.
    DispatchFailed(MessageId),
}

/// A conversation with the answer service, one outstanding question at a time.
pub struct ChatSession {
    transcript: Transcript,
    service: Arc<dyn AnswerService>,
    mode: AnswerMode,
    reveal: RevealDriver,
    active: Option<Exchange>,
}

impl ChatSession {
    pub fn new(
        transcript: Transcript,
        service: Arc<dyn AnswerService>,
        mode: AnswerMode,
        reveal: RevealDriver,
    ) -> Self {
        Self {
            transcript,
            service,
            mode,
            reveal,
            active: None,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn mode(&self) -> AnswerMode {
        self.mode
    }

    /// Applies to the next question; an answer already in flight keeps its producer.
    pub fn set_mode(&mut self, mode: AnswerMode) {
        if self.mode != mode {
            tracing::info!(from = %self.mode, to = %mode, "answer mode changed");
            self.mode = mode;
        }
    }

    pub fn is_answering(&self) -> bool {
        self.active.is_some()
    }

    /// Records the question and starts its answer. Must be called inside a tokio runtime.
    pub fn submit(&mut self, text: &str) -> SubmitOutcome {
        if self.active.is_some() || self.transcript.is_answering() {
            tracing::debug!("question refused while an answer is in flight");
            return SubmitOutcome::Busy;
        }

        let question = text.trim();
        if self.transcript.append_user_message(question).is_none() {
            return SubmitOutcome::Blank;
        }

        let handle = match self.mode {
            AnswerMode::Stream => match self.service.stream_answer(question) {
                Ok(handle) => handle,
                Err(error) => {
                    tracing::error!(
                        endpoint = self.service.endpoint(),
                        error = %error,
                        "failed to dispatch question"
                    );
                    let id = self.transcript.append_failed(FailureNotice::Apology);
                    return SubmitOutcome::DispatchFailed(id);
                }
            },
            AnswerMode::Reveal => {
                reveal_answer(self.service.clone(), question.to_string(), self.reveal)
            }
        };

        match self.transcript.begin_bot_message() {
            Ok(id) => {
                tracing::info!(message_id = %id, mode = %self.mode, "question dispatched");
                self.active = Some(Exchange::spawn(id, handle));
                SubmitOutcome::Dispatched(id)
            }
            Err(_) => SubmitOutcome::Busy,
        }
    }

    /// Waits for and applies the next event of the active answer.
    ///
    /// Returns `None` when nothing is in flight. Cancel safe.
    pub async fn next_step(&mut self) -> Option<Flow> {
        let exchange = self.active.as_mut()?;
        let item = exchange.recv().await;
        let flow = exchange.apply(&mut self.transcript, item);
        if flow == Flow::Finished {
            self.active = None;
        }
        Some(flow)
    }

    pub async fn run_until_idle(&mut self) {
        while let Some(Flow::Continue) = self.next_step().await {}
    }

    /// Cancels the active answer and seals its message, so nothing stays streaming.
    pub fn stop(&mut self) -> Option<MessageId> {
        let exchange = self.active.take()?;
        let id = exchange.cancel();
        let _ = self.transcript.seal_failed(id, FailureNotice::Cancelled);
        Some(id)
    }
}
