use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use citechat_chat::AnswerMode;
use citechat_stream::{DEFAULT_ENDPOINT, RevealDriver, ServiceConfig};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "citechat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "CITECHAT_";
pub const DEFAULT_REVEAL_DELAY_MS: u64 = 50;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_GREETING: &str = "Hello! I can answer questions about your card benefits, the application process and account policies, with sources for every answer. What would you like to know?";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub mode: AnswerMode,
    #[serde(default = "default_reveal_delay_ms")]
    pub reveal_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Opening assistant message. Empty disables it.
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            mode: AnswerMode::default(),
            reveal_delay_ms: default_reveal_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            greeting: default_greeting(),
        }
    }
}

impl Settings {
    pub fn normalized(mut self) -> Self {
        self.endpoint = if self.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.endpoint.trim().trim_end_matches('/').to_string()
        };
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = default_request_timeout_secs();
        }
        self.greeting = self.greeting.trim().to_string();

        self
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig::new(
            &self.endpoint,
            Duration::from_secs(self.request_timeout_secs),
        )
    }

    pub fn reveal_driver(&self) -> RevealDriver {
        RevealDriver::new(Duration::from_millis(self.reveal_delay_ms))
    }
}

/// Command-line values that win over file and environment for this run only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    pub endpoint: Option<String>,
    pub mode: Option<AnswerMode>,
    pub reveal_delay_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub no_greeting: bool,
}

impl SettingsOverrides {
    pub fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(endpoint) = &self.endpoint {
            settings.endpoint = endpoint.clone();
        }
        if let Some(mode) = self.mode {
            settings.mode = mode;
        }
        if let Some(delay) = self.reveal_delay_ms {
            settings.reveal_delay_ms = delay;
        }
        if let Some(timeout) = self.request_timeout_secs {
            settings.request_timeout_secs = timeout;
        }
        if self.no_greeting {
            settings.greeting.clear();
        }

        settings.normalized()
    }
}

/// How the settings file contributed when the store was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Missing,
    Loaded,
    /// Present but rejected; defaults were used instead.
    Unreadable,
}

/// Current settings plus the file they are saved back to.
///
/// Layers are defaults, then the JSON file, then `CITECHAT_*` environment variables.
pub struct SettingsStore {
    path: PathBuf,
    current: ArcSwap<Settings>,
    file_state: FileState,
    /// Set while an unreadable file has not yet been copied aside.
    backup_pending: AtomicBool,
}

impl SettingsStore {
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".citechat"))
            .join(SETTINGS_FILE_NAME)
    }

    pub fn new(path: PathBuf) -> Self {
        let (settings, file_state) = read_layers(&path);
        Self {
            path,
            current: ArcSwap::from_pointee(settings),
            file_state,
            backup_pending: AtomicBool::new(file_state == FileState::Unreadable),
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.path
    }

    pub fn file_state(&self) -> FileState {
        self.file_state
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.current.load_full()
    }

    /// Saves the new mode. An unreadable file is copied to `<name>.bak` before the
    /// first save replaces it.
    pub fn set_mode(&self, mode: AnswerMode) -> Result<(), SettingsError> {
        let mut next = Settings::clone(&self.current.load());
        next.mode = mode;
        let next = next.normalized();

        let content = serde_json::to_string_pretty(&next).context(SerializeSnafu {
            stage: "serialize-settings",
        })?;
        if self.backup_pending.swap(false, Ordering::AcqRel) {
            if let Err(error) = back_up(&self.path) {
                self.backup_pending.store(true, Ordering::Release);
                return Err(error);
            }
        }
        write_atomically(&self.path, &content)?;

        tracing::info!(path = ?self.path, mode = %next.mode, "saved settings");
        self.current.store(Arc::new(next));
        Ok(())
    }
}

fn read_layers(path: &Path) -> (Settings, FileState) {
    let present = path.exists();
    let figment = Figment::from(Serialized::defaults(Settings::default()))
        .merge(Json::file(path))
        .merge(Env::prefixed(ENV_PREFIX));

    match figment.extract::<Settings>().context(ExtractSnafu {
        stage: "extract-settings",
    }) {
        Ok(settings) if present => (settings.normalized(), FileState::Loaded),
        Ok(settings) => {
            tracing::info!(path = ?path, "no settings file, using defaults");
            (settings.normalized(), FileState::Missing)
        }
        Err(error) => {
            tracing::warn!(path = ?path, error = %error, "settings rejected, using defaults");
            let state = if present {
                FileState::Unreadable
            } else {
                FileState::Missing
            };
            (Settings::default(), state)
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn back_up(path: &Path) -> Result<(), SettingsError> {
    let backup = with_suffix(path, ".bak");
    match std::fs::copy(path, &backup) {
        Ok(_) => {
            tracing::warn!(path = ?path, backup = ?backup, "kept a copy of the unreadable settings file");
            Ok(())
        }
        // Removed since load; nothing left to preserve.
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(SettingsError::Backup {
            stage: "copy-unreadable-settings",
            path: backup,
            source,
        }),
    }
}

/// Writes to a sibling temp file then renames it over `path`.
fn write_atomically(path: &Path, content: &str) -> Result<(), SettingsError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).context(CreateDirectorySnafu {
            stage: "create-settings-directory",
            path: dir,
        })?;
    }

    let staged = with_suffix(path, ".tmp");
    std::fs::write(&staged, content).context(WriteSnafu {
        stage: "write-staged-settings",
        path: &staged,
    })?;
    std::fs::rename(&staged, path).context(ReplaceSnafu {
        stage: "replace-settings-file",
        path,
    })
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("could not create {path:?} on `{stage}`: {source}"))]
    CreateDirectory {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("could not encode settings on `{stage}`: {source}"))]
    Serialize {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("could not write {path:?} on `{stage}`: {source}"))]
    Write {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("could not replace {path:?} on `{stage}`: {source}"))]
    Replace {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("could not back up settings to {path:?} on `{stage}`: {source}"))]
    Backup {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("settings are invalid on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        source: figment::Error,
    },
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_reveal_delay_ms() -> u64 {
    DEFAULT_REVEAL_DELAY_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let store = SettingsStore::new(dir.path().join("settings.json"));

        assert_eq!(store.file_state(), FileState::Missing);
        assert_eq!(store.settings().mode, AnswerMode::Stream);
        assert_eq!(store.settings().reveal_delay_ms, DEFAULT_REVEAL_DELAY_MS);
        assert_eq!(store.settings().endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn partial_file_is_merged_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"endpoint": " http://answers.internal:9000/ ", "mode": "reveal"}"#,
        )
        .unwrap();

        let settings = SettingsStore::new(path).settings();

        assert_eq!(settings.endpoint, "http://answers.internal:9000");
        assert_eq!(settings.mode, AnswerMode::Reveal);
        assert_eq!(settings.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"mode": "telepathy"}"#).unwrap();

        let store = SettingsStore::new(path);

        assert_eq!(*store.settings(), Settings::default());
        assert_eq!(store.file_state(), FileState::Unreadable);
    }

    #[test]
    fn unreadable_file_is_kept_aside_before_first_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let original = r#"{"endpoint": "http://answers.internal", "mode": "telepathy"}"#;
        std::fs::write(&path, original).unwrap();
        let store = SettingsStore::new(path.clone());

        store.set_mode(AnswerMode::Reveal).unwrap();
        store.set_mode(AnswerMode::Stream).unwrap();

        let backup = dir.path().join("settings.json.bak");
        assert_eq!(std::fs::read_to_string(backup).unwrap(), original);
        let reloaded = SettingsStore::new(path);
        assert_eq!(reloaded.file_state(), FileState::Loaded);
        assert_eq!(reloaded.settings().mode, AnswerMode::Stream);
    }

    #[test]
    fn set_mode_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone());

        store.set_mode(AnswerMode::Reveal).unwrap();

        assert_eq!(store.settings().mode, AnswerMode::Reveal);
        assert!(!path.with_extension("json.tmp").exists());
        assert!(!path.with_extension("json.bak").exists());
        assert_eq!(SettingsStore::new(path).settings().mode, AnswerMode::Reveal);
    }

    #[test]
    fn normalization_repairs_blank_values() {
        let settings = Settings {
            endpoint: "   ".to_string(),
            request_timeout_secs: 0,
            greeting: "  hi  ".to_string(),
            ..Settings::default()
        }
        .normalized();

        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(settings.greeting, "hi");
    }

    #[test]
    fn overrides_win_and_are_normalized() {
        let overrides = SettingsOverrides {
            endpoint: Some("http://localhost:9999/".to_string()),
            mode: Some(AnswerMode::Reveal),
            reveal_delay_ms: Some(5),
            request_timeout_secs: None,
            no_greeting: true,
        };

        let settings = overrides.apply(Settings::default());

        assert_eq!(settings.endpoint, "http://localhost:9999");
        assert_eq!(settings.mode, AnswerMode::Reveal);
        assert_eq!(settings.reveal_driver().delay(), Duration::from_millis(5));
        assert!(settings.greeting.is_empty());
        assert_eq!(
            settings.service_config().request_timeout,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
    }
}
