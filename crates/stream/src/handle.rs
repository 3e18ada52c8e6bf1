use std::future::Future;
use std::pin::Pin;

use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

use crate::error::StreamResult;
use crate::event::ProtocolEvent;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type StreamWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// One item delivered to the consumer: a decoded event or the failure that ended the stream.
pub type StreamItem = StreamResult<ProtocolEvent>;

/// Consumer side of one answer: ordered events plus the cancellation switch.
pub struct AnswerEventStream {
    events: mpsc::UnboundedReceiver<StreamItem>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

/// Everything needed to run one answer: the consumer stream and the producer future.
///
/// The worker does nothing until spawned.
pub struct AnswerStreamHandle {
    pub stream: AnswerEventStream,
    pub worker: StreamWorker,
}

impl AnswerEventStream {
    pub async fn recv(&mut self) -> Option<StreamItem> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamItem> {
        self.events.try_recv().ok()
    }

    /// Signals the producer to stop. Returns false if it was already signalled or gone.
    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_tx.is_none()
    }
}

impl Drop for AnswerEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Producer side of one answer.
///
/// Every emission re-checks cancellation, so a producer that was cancelled between
/// scheduling and firing never delivers another event.
pub struct EventSink {
    events: mpsc::UnboundedSender<StreamItem>,
    cancel_rx: oneshot::Receiver<()>,
    cancelled: bool,
}

impl EventSink {
    /// Returns false once the consumer cancelled or went away.
    pub fn is_live(&mut self) -> bool {
        if self.cancelled {
            return false;
        }

        match self.cancel_rx.try_recv() {
            Err(TryRecvError::Empty) => !self.events.is_closed(),
            Ok(()) | Err(TryRecvError::Closed) => {
                self.cancelled = true;
                false
            }
        }
    }

    /// Delivers one item if the consumer is still live. Returns whether it was delivered.
    pub fn emit(&mut self, item: StreamItem) -> bool {
        if !self.is_live() {
            return false;
        }

        self.events.send(item).is_ok()
    }

    /// Resolves once cancellation is requested. Safe to await repeatedly.
    pub async fn wait_cancelled(&mut self) {
        if self.cancelled {
            return;
        }

        let _ = (&mut self.cancel_rx).await;
        self.cancelled = true;
    }
}

pub fn make_event_stream() -> (EventSink, AnswerEventStream) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        EventSink {
            events: event_tx,
            cancel_rx,
            cancelled: false,
        },
        AnswerEventStream {
            events: event_rx,
            cancel_tx: Some(cancel_tx),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_sink_stops_emitting() {
        let (mut sink, mut stream) = make_event_stream();

        assert!(sink.emit(Ok(ProtocolEvent::Start)));
        assert!(stream.cancel());
        assert!(!sink.emit(Ok(ProtocolEvent::Chunk("late".to_string()))));

        assert_eq!(stream.recv().await.map(|item| item.ok()), Some(Some(ProtocolEvent::Start)));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn dropping_stream_resolves_wait_cancelled() {
        let (mut sink, stream) = make_event_stream();

        drop(stream);
        sink.wait_cancelled().await;
        sink.wait_cancelled().await;

        assert!(!sink.is_live());
    }

    #[test]
    fn second_cancel_reports_false() {
        let (_sink, mut stream) = make_event_stream();

        assert!(stream.cancel());
        assert!(!stream.cancel());
        assert!(stream.is_cancelled());
    }
}
