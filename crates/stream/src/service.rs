use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use snafu::{ResultExt, ensure};

use crate::error::{
    BuildClientSnafu, EmptyQuestionSnafu, ParseAnswerSnafu, ReadBodySnafu, ResponseStatusSnafu,
    SendRequestSnafu, StreamError, StreamResult,
};
use crate::event::AnswerPayload;
use crate::handle::{AnswerStreamHandle, BoxFuture, EventSink, StreamWorker, make_event_stream};
use crate::reveal::RevealDriver;
use crate::sse::decode_stream;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const QUERY_PATH: &str = "/query";
pub const STREAM_QUERY_PATH: &str = "/query/stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub endpoint: String,
    pub request_timeout: Duration,
}

impl ServiceConfig {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Self {
        let endpoint = endpoint.into();
        let endpoint = endpoint.trim().trim_end_matches('/');
        Self {
            endpoint: if endpoint.is_empty() {
                DEFAULT_ENDPOINT.to_string()
            } else {
                endpoint.to_string()
            },
            request_timeout,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT)
    }
}

/// Remote service that answers questions, either as a push stream or in one shot.
pub trait AnswerService: Send + Sync {
    fn endpoint(&self) -> &str;

    /// Opens a server-push answer stream. The returned worker must be spawned.
    fn stream_answer(&self, question: &str) -> StreamResult<AnswerStreamHandle>;

    /// Fetches a complete answer with its sources in a single request.
    fn fetch_answer<'a>(&'a self, question: &'a str) -> BoxFuture<'a, StreamResult<AnswerPayload>>;
}

/// Fetches a complete answer, then replays it through `driver`.
///
/// A fetch failure is delivered as the stream's only item.
pub fn reveal_answer(
    service: Arc<dyn AnswerService>,
    question: String,
    driver: RevealDriver,
) -> AnswerStreamHandle {
    let (mut sink, stream) = make_event_stream();
    let worker: StreamWorker = Box::pin(async move {
        let fetched = tokio::select! {
            _ = sink.wait_cancelled() => {
                tracing::debug!("answer fetch cancelled before reveal");
                return;
            }
            fetched = service.fetch_answer(&question) => fetched,
        };

        match fetched {
            Ok(payload) => {
                let (answer, citations) = payload.into_parts();
                tracing::debug!(
                    answer_len = answer.len(),
                    citation_count = citations.len(),
                    "revealing fetched answer"
                );
                driver.run(answer, citations, sink).await;
            }
            Err(error) => {
                log_failure(&error, service.endpoint());
                sink.emit(Err(error));
            }
        }
    });

    AnswerStreamHandle { stream, worker }
}

#[derive(Serialize)]
struct QuestionRequest<'a> {
    question: &'a str,
}

/// HTTP client for the answer service.
#[derive(Clone)]
pub struct HttpAnswerService {
    client: reqwest::Client,
    config: ServiceConfig,
}

impl HttpAnswerService {
    pub fn new(config: ServiceConfig) -> StreamResult<Self> {
        // The overall timeout would also cap a long-running stream, so streaming
        // requests only bound the connect phase.
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "build-http-client",
            })?;

        Ok(Self { client, config })
    }

    async fn post_question(
        client: &reqwest::Client,
        url: &str,
        question: &str,
        timeout: Option<Duration>,
    ) -> StreamResult<reqwest::Response> {
        let mut request = client.post(url).json(&QuestionRequest { question });
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        tracing::info!(url, question_len = question.len(), "dispatching question");
        let response = request.send().await.context(SendRequestSnafu {
            stage: "send-question",
            url,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return ResponseStatusSnafu {
                stage: "check-response-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        Ok(response)
    }

    async fn run_stream_worker(
        client: reqwest::Client,
        url: String,
        question: String,
        mut sink: EventSink,
    ) {
        let opened = tokio::select! {
            _ = sink.wait_cancelled() => {
                tracing::debug!(url = %url, "answer stream cancelled before response");
                return;
            }
            opened = Self::post_question(&client, &url, &question, None) => opened,
        };

        let response = match opened {
            Ok(response) => response,
            Err(error) => {
                log_failure(&error, &url);
                sink.emit(Err(error));
                return;
            }
        };

        let mut events = Box::pin(decode_stream(response.bytes_stream()));
        loop {
            tokio::select! {
                _ = sink.wait_cancelled() => {
                    tracing::debug!(url = %url, "answer stream cancelled");
                    return;
                }
                next = events.next() => {
                    let Some(item) = next else {
                        return;
                    };
                    if let Err(error) = &item {
                        log_failure(error, &url);
                    }
                    if !sink.emit(item) {
                        return;
                    }
                }
            }
        }
    }

    async fn fetch_payload(&self, question: &str) -> StreamResult<AnswerPayload> {
        ensure!(
            !question.trim().is_empty(),
            EmptyQuestionSnafu {
                stage: "fetch-answer",
            }
        );

        let url = self.config.url(QUERY_PATH);
        let response = Self::post_question(
            &self.client,
            &url,
            question,
            Some(self.config.request_timeout),
        )
        .await?;
        let body = response.text().await.context(ReadBodySnafu {
            stage: "read-answer-body",
        })?;

        serde_json::from_str(&body).context(ParseAnswerSnafu {
            stage: "parse-answer-body",
        })
    }
}

impl AnswerService for HttpAnswerService {
    fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn stream_answer(&self, question: &str) -> StreamResult<AnswerStreamHandle> {
        ensure!(
            !question.trim().is_empty(),
            EmptyQuestionSnafu {
                stage: "stream-answer",
            }
        );

        let (sink, stream) = make_event_stream();
        let worker: StreamWorker = Box::pin(Self::run_stream_worker(
            self.client.clone(),
            self.config.url(STREAM_QUERY_PATH),
            question.to_string(),
            sink,
        ));

        Ok(AnswerStreamHandle { stream, worker })
    }

    fn fetch_answer<'a>(&'a self, question: &'a str) -> BoxFuture<'a, StreamResult<AnswerPayload>> {
        Box::pin(self.fetch_payload(question))
    }
}

fn log_failure(error: &StreamError, url: &str) {
    match error.hint() {
        Some(hint) => tracing::error!(url, error = %error, hint, "answer request failed"),
        None => tracing::error!(url, error = %error, "answer request failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ProtocolEvent, RawSource};

    struct CannedService {
        answer: StreamResult<AnswerPayload>,
    }

    impl AnswerService for CannedService {
        fn endpoint(&self) -> &str {
            "test://canned"
        }

        fn stream_answer(&self, _question: &str) -> StreamResult<AnswerStreamHandle> {
            EmptyQuestionSnafu { stage: "canned" }.fail()
        }

        fn fetch_answer<'a>(
            &'a self,
            _question: &'a str,
        ) -> BoxFuture<'a, StreamResult<AnswerPayload>> {
            Box::pin(async move {
                match &self.answer {
                    Ok(payload) => Ok(payload.clone()),
                    Err(_) => ResponseStatusSnafu {
                        stage: "canned",
                        status: 500u16,
                        body: "boom",
                    }
                    .fail(),
                }
            })
        }
    }

    async fn collect(handle: AnswerStreamHandle) -> Vec<StreamResult<ProtocolEvent>> {
        let AnswerStreamHandle { mut stream, worker } = handle;
        tokio::spawn(worker);

        let mut items = Vec::new();
        while let Some(item) = stream.recv().await {
            items.push(item);
        }
        items
    }

    #[test]
    fn config_trims_endpoint_and_builds_urls() {
        let config = ServiceConfig::new(" http://answers.local:9000/ ", DEFAULT_REQUEST_TIMEOUT);

        assert_eq!(config.endpoint, "http://answers.local:9000");
        assert_eq!(
            config.url(STREAM_QUERY_PATH),
            "http://answers.local:9000/query/stream"
        );
        assert_eq!(
            ServiceConfig::new("  ", DEFAULT_REQUEST_TIMEOUT).endpoint,
            DEFAULT_ENDPOINT
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reveal_answer_replays_fetched_payload() {
        let service = Arc::new(CannedService {
            answer: Ok(AnswerPayload {
                answer: "No annual fee".to_string(),
                sources: vec![RawSource {
                    title: Some("Fee Schedule".to_string()),
                    ..RawSource::default()
                }],
            }),
        });

        let items = collect(reveal_answer(
            service,
            "fees?".to_string(),
            RevealDriver::default(),
        ))
        .await;
        let events = items
            .into_iter()
            .map(|item| item.expect("canned fetch succeeds"))
            .collect::<Vec<_>>();

        assert_eq!(events.len(), 4);
        assert_eq!(events[2], ProtocolEvent::Chunk("No annual fee".to_string()));
        assert!(matches!(
            &events[3],
            ProtocolEvent::Complete { citations, .. }
                if citations[0].raw_title.as_deref() == Some("Fee Schedule")
        ));
    }

    #[tokio::test]
    async fn reveal_answer_surfaces_fetch_failure_once() {
        let service = Arc::new(CannedService {
            answer: EmptyQuestionSnafu { stage: "canned" }.fail(),
        });

        let items = collect(reveal_answer(
            service,
            "fees?".to_string(),
            RevealDriver::default(),
        ))
        .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            Err(StreamError::ResponseStatus { status: 500, .. })
        ));
    }

    #[test]
    fn blank_question_is_rejected_before_dispatch() {
        let service = HttpAnswerService::new(ServiceConfig::default()).unwrap();

        assert!(matches!(
            service.stream_answer("   "),
            Err(StreamError::EmptyQuestion { .. })
        ));
    }
}
