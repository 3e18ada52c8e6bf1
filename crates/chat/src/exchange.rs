use citechat_stream::{AnswerEventStream, AnswerStreamHandle, ProtocolEvent, StreamItem};

use crate::message::MessageId;
use crate::transcript::{FailureNotice, Transcript};

/// Whether an exchange expects more events after the one just applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finished,
}

/// Applies one decoded event to the message it targets.
///
/// A rejected chunk means the message was sealed elsewhere, so the exchange is over.
pub fn apply_event(transcript: &mut Transcript, id: MessageId, event: ProtocolEvent) -> Flow {
    match event {
        ProtocolEvent::Start => {
            tracing::debug!(message_id = %id, "answer stream started");
            Flow::Continue
        }
        ProtocolEvent::Chunk(text) => match transcript.apply_chunk(id, text) {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Finished,
        },
        ProtocolEvent::Complete { answer, citations } => {
            let _ = transcript.seal_complete(id, answer, citations);
            Flow::Finished
        }
        ProtocolEvent::Error { message } => {
            tracing::warn!(message_id = %id, service_message = ?message, "answer service reported an error");
            let notice = match message {
                Some(message) => FailureNotice::Service(message),
                None => FailureNotice::Apology,
            };
            let _ = transcript.seal_failed(id, notice);
            Flow::Finished
        }
    }
}

/// One in-flight answer bound to the assistant message it fills.
///
/// Streamed and revealed answers both arrive here, so the transcript never knows
/// which producer is behind a message.
pub struct Exchange {
    message_id: MessageId,
    stream: AnswerEventStream,
    finished: bool,
}

impl Exchange {
    /// Spawns the producer worker onto the current runtime.
    pub fn spawn(message_id: MessageId, handle: AnswerStreamHandle) -> Self {
        let AnswerStreamHandle { stream, worker } = handle;
        tokio::spawn(worker);

        Self {
            message_id,
            stream,
            finished: false,
        }
    }

    /// Waits for the producer's next item. `None` means the producer is gone.
    pub async fn recv(&mut self) -> Option<StreamItem> {
        if self.finished {
            return None;
        }
        self.stream.recv().await
    }

    /// Applies one received item. Transport failure and a producer that vanished
    /// without a terminal event both seal the message failed, once.
    pub fn apply(&mut self, transcript: &mut Transcript, item: Option<StreamItem>) -> Flow {
        if self.finished {
            return Flow::Finished;
        }

        let id = self.message_id;
        let flow = match item {
            Some(Ok(event)) => apply_event(transcript, id, event),
            Some(Err(error)) => {
                tracing::error!(message_id = %id, error = %error, "answer stream failed");
                let _ = transcript.seal_failed(id, FailureNotice::Apology);
                Flow::Finished
            }
            None => {
                tracing::error!(message_id = %id, "answer producer stopped without a terminal event");
                let _ = transcript.seal_failed(id, FailureNotice::Apology);
                Flow::Finished
            }
        };

        if flow == Flow::Finished {
            self.finished = true;
            self.stream.cancel();
        }
        flow
    }

    /// Drives the exchange until its message is sealed.
    pub async fn run(mut self, transcript: &mut Transcript) {
        loop {
            let item = self.recv().await;
            if self.apply(transcript, item) == Flow::Finished {
                break;
            }
        }
    }

    /// Stops the producer. The target message is left as it is.
    pub fn cancel(mut self) -> MessageId {
        if self.stream.cancel() {
            tracing::debug!(message_id = %self.message_id, "answer exchange cancelled");
        }
        self.message_id
    }
}
