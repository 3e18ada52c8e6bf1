use std::path::PathBuf;

use citechat_chat::AnswerMode;
use clap::Parser;

use crate::settings::SettingsOverrides;

/// Ask questions, get answers with their sources.
#[derive(Debug, Parser)]
#[command(name = "citechat", version)]
pub struct Cli {
    /// Settings file to read and to save mode changes to.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Base URL of the answer service.
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,
    /// `stream` for server-push answers, `reveal` for one-shot answers shown word by word.
    #[arg(long, value_parser = parse_mode)]
    pub mode: Option<AnswerMode>,
    #[arg(long, value_name = "MS")]
    pub reveal_delay_ms: Option<u64>,
    #[arg(long, value_name = "SECS")]
    pub request_timeout_secs: Option<u64>,
    /// Start without the greeting message.
    #[arg(long)]
    pub no_greeting: bool,
}

impl Cli {
    pub fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            endpoint: self.endpoint.clone(),
            mode: self.mode,
            reveal_delay_ms: self.reveal_delay_ms,
            request_timeout_secs: self.request_timeout_secs,
            no_greeting: self.no_greeting,
        }
    }
}

fn parse_mode(value: &str) -> Result<AnswerMode, String> {
    AnswerMode::parse(value).ok_or_else(|| format!("unknown mode '{value}', expected stream or reveal"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "citechat",
            "--endpoint",
            "http://answers:8080",
            "--mode",
            "reveal",
            "--no-greeting",
        ])
        .unwrap();

        let overrides = cli.overrides();

        assert_eq!(overrides.endpoint.as_deref(), Some("http://answers:8080"));
        assert_eq!(overrides.mode, Some(AnswerMode::Reveal));
        assert!(overrides.no_greeting);
        assert_eq!(overrides.reveal_delay_ms, None);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["citechat", "--mode", "batch"]).is_err());
    }
}
