use std::io::{self, Write};

use chrono::Local;
use citechat_chat::{ChangeKind, Message, MessageId, MessageStatus, Role, TranscriptChange};

/// Prints transcript changes as a scrolling plain-text conversation.
///
/// Cumulative chunks are printed as suffixes, so a streaming answer grows on one line.
pub struct TerminalRenderer<W> {
    out: W,
    live: Option<LiveMessage>,
}

struct LiveMessage {
    id: MessageId,
    printed: String,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, live: None }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn render(&mut self, change: &TranscriptChange) -> io::Result<()> {
        let message = &change.message;
        match change.kind {
            ChangeKind::Appended if message.status == MessageStatus::Streaming => {
                self.finish_live()?;
                write!(self.out, "{} ", header(message))?;
                self.live = Some(LiveMessage {
                    id: message.id,
                    printed: String::new(),
                });
            }
            ChangeKind::Appended => {
                self.finish_live()?;
                writeln!(self.out, "{} {}", header(message), message.text)?;
                if message.status == MessageStatus::Complete {
                    self.write_sources(message)?;
                }
            }
            ChangeKind::Updated => self.write_progress(message)?,
            ChangeKind::Sealed => self.write_sealed(message)?,
        }

        self.out.flush()
    }

    /// Prints a line that is not part of the conversation, such as a command reply.
    pub fn notice(&mut self, text: &str) -> io::Result<()> {
        self.finish_live()?;
        writeln!(self.out, "-- {text}")?;
        self.out.flush()
    }

    fn write_progress(&mut self, message: &Message) -> io::Result<()> {
        let Some(live) = self.live.as_mut().filter(|live| live.id == message.id) else {
            return Ok(());
        };

        match message.text.strip_prefix(live.printed.as_str()) {
            Some(suffix) => write!(self.out, "{suffix}")?,
            // The service rewrote earlier text; start the answer over on a fresh line.
            None => write!(self.out, "\n    {}", message.text)?,
        }
        live.printed.clone_from(&message.text);
        Ok(())
    }

    fn write_sealed(&mut self, message: &Message) -> io::Result<()> {
        let is_live = self.live.as_ref().is_some_and(|live| live.id == message.id);
        if !is_live {
            self.finish_live()?;
            writeln!(self.out, "{} {}", header(message), message.text)?;
        } else if message.status == MessageStatus::Complete {
            self.write_progress(message)?;
            self.live = None;
            writeln!(self.out)?;
        } else {
            let printed_any = self
                .live
                .take()
                .is_some_and(|live| !live.printed.is_empty());
            if printed_any {
                writeln!(self.out, " [interrupted]")?;
                writeln!(self.out, "    {}", message.text)?;
            } else {
                writeln!(self.out, "{}", message.text)?;
            }
        }

        if message.status == MessageStatus::Complete {
            self.write_sources(message)?;
        }
        Ok(())
    }

    fn write_sources(&mut self, message: &Message) -> io::Result<()> {
        let citations = message.display_citations();
        if citations.is_empty() {
            return Ok(());
        }

        writeln!(self.out, "    Sources:")?;
        for (index, citation) in citations.iter().enumerate() {
            write!(
                self.out,
                "      [{}] {} ({})",
                index + 1,
                citation.display_name,
                citation.category.label()
            )?;
            if let Some(link) = &citation.link {
                write!(self.out, " <{link}>")?;
            }
            writeln!(self.out)?;
            if let Some(preview) = &citation.preview {
                writeln!(self.out, "          {preview}")?;
            }
        }
        Ok(())
    }

    fn finish_live(&mut self) -> io::Result<()> {
        if self.live.take().is_some() {
            writeln!(self.out)?;
        }
        Ok(())
    }
}

fn header(message: &Message) -> String {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "bot",
    };
    format!(
        "[{}] {speaker}:",
        message.created_at.with_timezone(&Local).format("%H:%M")
    )
}
