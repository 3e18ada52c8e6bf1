use std::io::{Stdout, Write, stdout};
use std::sync::Arc;

use citechat_chat::{AnswerMode, ChatSession, Flow, SubmitOutcome, Transcript, TranscriptChange};
use citechat_stream::HttpAnswerService;
use snafu::ResultExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use crate::cli::Cli;
use crate::error::{AppError, BuildServiceSnafu, ReadInputSnafu, WriteOutputSnafu};
use crate::render::TerminalRenderer;
use crate::settings::{Settings, SettingsStore};

const HELP_TEXT: &str = "type a question, or /stop to cancel the answer, /mode [stream|reveal], /help, /quit";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ask(String),
    Stop,
    ShowMode,
    SetMode(AnswerMode),
    UnknownMode(String),
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let mut words = line.split_whitespace();
        match words.next() {
            Some("/stop") => Self::Stop,
            Some("/mode") => match words.next() {
                None => Self::ShowMode,
                Some(value) => AnswerMode::parse(value)
                    .map(Self::SetMode)
                    .unwrap_or_else(|| Self::UnknownMode(value.to_string())),
            },
            Some("/help") => Self::Help,
            Some("/quit" | "/exit") => Self::Quit,
            _ => Self::Ask(line.to_string()),
        }
    }
}

enum Action {
    Input(std::io::Result<Option<String>>),
    Progress,
    Interrupt,
}

pub struct App<W: Write = Stdout> {
    store: SettingsStore,
    session: ChatSession,
    changes: broadcast::Receiver<TranscriptChange>,
    renderer: TerminalRenderer<W>,
}

impl App {
    pub fn new(cli: &Cli) -> Result<Self, AppError> {
        let store = match &cli.config {
            Some(path) => SettingsStore::new(path.clone()),
            None => SettingsStore::load(),
        };
        let settings = cli.overrides().apply(Settings::clone(&store.settings()));

        let service = HttpAnswerService::new(settings.service_config()).context(BuildServiceSnafu {
            stage: "build-answer-service",
        })?;
        tracing::info!(
            endpoint = %settings.endpoint,
            mode = %settings.mode,
            config = ?store.config_path(),
            config_file = ?store.file_state(),
            "starting chat session"
        );

        // Subscribe before seeding the greeting so it is rendered too.
        let transcript = Transcript::new();
        let changes = transcript.subscribe();
        let transcript = transcript.with_greeting(&settings.greeting);
        let session = ChatSession::new(
            transcript,
            Arc::new(service),
            settings.mode,
            settings.reveal_driver(),
        );

        Ok(Self::from_parts(store, session, changes, stdout()))
    }

    pub async fn run(mut self) -> Result<(), AppError> {
        self.drive(BufReader::new(tokio::io::stdin())).await
    }
}

impl<W: Write> App<W> {
    /// `changes` must be subscribed to the session's transcript.
    pub fn from_parts(
        store: SettingsStore,
        session: ChatSession,
        changes: broadcast::Receiver<TranscriptChange>,
        out: W,
    ) -> Self {
        Self {
            store,
            session,
            changes,
            renderer: TerminalRenderer::new(out),
        }
    }

    pub fn into_output(self) -> W {
        self.renderer.into_inner()
    }

    /// Reads commands until quit. Once input ends, the answer in flight still runs to its end.
    pub async fn drive<R>(&mut self, input: R) -> Result<(), AppError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut input_open = true;
        self.notice(HELP_TEXT)?;

        loop {
            self.drain_changes()?;
            if !input_open && !self.session.is_answering() {
                break;
            }

            let action = tokio::select! {
                line = lines.next_line(), if input_open => Action::Input(line),
                flow = self.session.next_step(), if self.session.is_answering() => {
                    if flow == Some(Flow::Finished) {
                        tracing::debug!("answer finished");
                    }
                    Action::Progress
                }
                _ = tokio::signal::ctrl_c() => Action::Interrupt,
            };

            match action {
                Action::Progress => {}
                Action::Interrupt => {
                    if self.session.stop().is_none() {
                        break;
                    }
                }
                Action::Input(line) => match line.context(ReadInputSnafu { stage: "read-line" })? {
                    Some(line) => {
                        if !self.handle_line(&line)? {
                            break;
                        }
                    }
                    None => {
                        tracing::debug!(answering = self.session.is_answering(), "input closed");
                        input_open = false;
                    }
                },
            }
        }

        self.session.stop();
        self.drain_changes()
    }

    /// Returns false when the user asked to quit.
    fn handle_line(&mut self, line: &str) -> Result<bool, AppError> {
        match Command::parse(line) {
            Command::Ask(question) => match self.session.submit(&question) {
                SubmitOutcome::Busy => {
                    self.notice("still answering, wait for it or use /stop")?
                }
                SubmitOutcome::Blank
                | SubmitOutcome::Dispatched(_)
                | SubmitOutcome::DispatchFailed(_) => {}
            },
            Command::Stop => {
                if self.session.stop().is_none() {
                    self.notice("nothing to stop")?;
                }
            }
            Command::ShowMode => {
                let mode = self.session.mode();
                self.notice(&format!("answer mode is {mode}"))?;
            }
            Command::SetMode(mode) => self.set_mode(mode)?,
            Command::UnknownMode(value) => {
                self.notice(&format!("unknown mode '{value}', expected stream or reveal"))?
            }
            Command::Help => self.notice(HELP_TEXT)?,
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn set_mode(&mut self, mode: AnswerMode) -> Result<(), AppError> {
        self.session.set_mode(mode);
        let reply = match self.store.set_mode(mode) {
            Ok(()) => format!("answer mode set to {mode}"),
            Err(error) => {
                tracing::warn!(error = %error, "failed to save answer mode");
                format!("answer mode set to {mode} for this session only")
            }
        };
        self.notice(&reply)
    }

    fn drain_changes(&mut self) -> Result<(), AppError> {
        loop {
            match self.changes.try_recv() {
                Ok(change) => self.renderer.render(&change).context(WriteOutputSnafu {
                    stage: "render-change",
                })?,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "renderer fell behind the transcript");
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return Ok(()),
            }
        }
    }

    fn notice(&mut self, text: &str) -> Result<(), AppError> {
        self.renderer.notice(text).context(WriteOutputSnafu {
            stage: "write-notice",
        })
    }
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    App::new(&cli)?.run().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use citechat_chat::CANCELLED_TEXT;
    use citechat_stream::{
        AnswerPayload, AnswerService, AnswerStreamHandle, BoxFuture, ProtocolEvent, RevealDriver,
        StreamResult, StreamWorker, make_event_stream,
    };

    use super::*;

    /// Answers every question with the same streamed text after a short pause.
    struct SlowService {
        answer: &'static str,
    }

    impl AnswerService for SlowService {
        fn endpoint(&self) -> &str {
            "test://slow"
        }

        fn stream_answer(&self, _question: &str) -> StreamResult<AnswerStreamHandle> {
            let answer = self.answer.to_string();
            let (mut sink, stream) = make_event_stream();
            let worker: StreamWorker = Box::pin(async move {
                sink.emit(Ok(ProtocolEvent::Start));
                tokio::time::sleep(Duration::from_millis(20)).await;
                sink.emit(Ok(ProtocolEvent::Chunk(answer.clone())));
                tokio::time::sleep(Duration::from_millis(20)).await;
                sink.emit(Ok(ProtocolEvent::Complete {
                    answer,
                    citations: Vec::new(),
                }));
            });
            Ok(AnswerStreamHandle { stream, worker })
        }

        fn fetch_answer<'a>(&'a self, _question: &'a str) -> BoxFuture<'a, StreamResult<AnswerPayload>> {
            Box::pin(async move {
                Ok(AnswerPayload {
                    answer: self.answer.to_string(),
                    sources: Vec::new(),
                })
            })
        }
    }

    fn test_app(dir: &tempfile::TempDir) -> App<Vec<u8>> {
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let transcript = Transcript::new();
        let changes = transcript.subscribe();
        let session = ChatSession::new(
            transcript,
            Arc::new(SlowService {
                answer: "There is no annual fee.",
            }),
            AnswerMode::Stream,
            RevealDriver::new(Duration::from_millis(1)),
        );
        App::from_parts(store, session, changes, Vec::new())
    }

    #[tokio::test]
    async fn piped_question_is_answered_before_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = test_app(&dir);

        app.drive(&b"is there an annual fee?\n"[..]).await.unwrap();

        let output = String::from_utf8(app.into_output()).unwrap();
        assert!(output.contains("you: is there an annual fee?"));
        assert!(output.contains("bot: There is no annual fee."));
        assert!(!output.contains(CANCELLED_TEXT));
    }

    #[tokio::test]
    async fn quit_still_cancels_the_answer_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = test_app(&dir);

        app.drive(&b"is there an annual fee?\n/quit\n"[..]).await.unwrap();

        let output = String::from_utf8(app.into_output()).unwrap();
        assert!(output.contains(CANCELLED_TEXT));
        assert!(!output.contains("There is no annual fee."));
    }

    #[tokio::test]
    async fn mode_command_is_saved_to_the_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = test_app(&dir);

        app.drive(&b"/mode reveal\n"[..]).await.unwrap();

        assert_eq!(
            SettingsStore::new(dir.path().join("settings.json")).settings().mode,
            AnswerMode::Reveal
        );
        let output = String::from_utf8(app.into_output()).unwrap();
        assert!(output.contains("-- answer mode set to reveal"));
    }

    #[test]
    fn plain_text_is_a_question() {
        assert_eq!(
            Command::parse("  what is the APR?  "),
            Command::Ask("what is the APR?".to_string())
        );
    }

    #[test]
    fn slash_commands_are_recognized() {
        assert_eq!(Command::parse("/stop"), Command::Stop);
        assert_eq!(Command::parse("/mode"), Command::ShowMode);
        assert_eq!(
            Command::parse("/mode Reveal"),
            Command::SetMode(AnswerMode::Reveal)
        );
        assert_eq!(
            Command::parse("/mode fast"),
            Command::UnknownMode("fast".to_string())
        );
        assert_eq!(Command::parse("/exit"), Command::Quit);
        assert_eq!(Command::parse("/help"), Command::Help);
    }
}
