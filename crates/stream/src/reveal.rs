use std::time::Duration;

use crate::event::{Citation, ProtocolEvent};
use crate::handle::{AnswerStreamHandle, EventSink, StreamWorker, make_event_stream};

pub const DEFAULT_REVEAL_DELAY: Duration = Duration::from_millis(50);

/// Replays a fully received answer as a word-by-word stream.
///
/// Each chunk carries the cumulative prefix, matching what a true push stream sends,
/// so consumers cannot tell the two producers apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealDriver {
    delay: Duration,
}

impl Default for RevealDriver {
    fn default() -> Self {
        Self::new(DEFAULT_REVEAL_DELAY)
    }
}

impl RevealDriver {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Builds a handle whose worker reveals `answer`. Nothing happens until the worker is spawned.
    pub fn start(self, answer: String, citations: Vec<Citation>) -> AnswerStreamHandle {
        let (sink, stream) = make_event_stream();
        let worker: StreamWorker = Box::pin(self.run(answer, citations, sink));
        AnswerStreamHandle { stream, worker }
    }

    /// Emits one cumulative chunk per whitespace-delimited token, then `Complete`.
    pub async fn run(self, answer: String, citations: Vec<Citation>, mut sink: EventSink) {
        let mut revealed = String::with_capacity(answer.len());

        for (index, token) in answer.split_whitespace().enumerate() {
            tokio::select! {
                _ = sink.wait_cancelled() => {
                    tracing::debug!(revealed_tokens = index, "reveal cancelled");
                    return;
                }
                _ = tokio::time::sleep(self.delay) => {}
            }

            if index > 0 {
                revealed.push(' ');
            }
            revealed.push_str(token);

            if !sink.emit(Ok(ProtocolEvent::Chunk(revealed.clone()))) {
                tracing::debug!(revealed_tokens = index, "reveal consumer went away");
                return;
            }
        }

        sink.emit(Ok(ProtocolEvent::Complete { answer, citations }));
    }
}
