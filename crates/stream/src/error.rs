use snafu::Snafu;

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StreamError {
    #[snafu(display("question is blank on `{stage}`"))]
    EmptyQuestion { stage: &'static str },
    #[snafu(display("failed to build http client on `{stage}`, {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to send question to {url} on `{stage}`, {source}"))]
    SendRequest {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("answer service returned status {status} on `{stage}`: {body}"))]
    ResponseStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to read answer body on `{stage}`, {source}"))]
    ReadBody {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to parse answer payload on `{stage}`, {source}"))]
    ParseAnswer {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("answer transport failed on `{stage}`: {message}"))]
    Transport {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("answer stream ended before a terminal event on `{stage}`"))]
    EndedWithoutTerminal { stage: &'static str },
}

impl StreamError {
    /// Operator-facing hint for common failure causes, used in logs only.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::SendRequest { source, .. } if source.is_connect() => {
                Some("unable to connect to the answer service, check that it is running")
            }
            Self::SendRequest { source, .. } | Self::ReadBody { source, .. }
                if source.is_timeout() =>
            {
                Some("the answer service did not respond in time")
            }
            Self::ResponseStatus { status: 429, .. } => {
                Some("too many requests, wait a moment before trying again")
            }
            Self::ResponseStatus { status, .. } if *status >= 500 => {
                Some("the answer service hit a server error")
            }
            _ => None,
        }
    }
}

/// Reasons a single SSE frame was dropped. Logged, never surfaced to callers.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FrameError {
    #[snafu(display("frame payload is not valid JSON on `{stage}`, {source}"))]
    InvalidJson {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("frame names unknown event type '{name}'"))]
    UnknownEvent { stage: &'static str, name: String },
    #[snafu(display("frame carries no event type"))]
    MissingEventType { stage: &'static str },
    #[snafu(display("`{event}` frame is missing field `{field}`"))]
    MissingField {
        stage: &'static str,
        event: &'static str,
        field: &'static str,
    },
}
