//! Persisted settings: API credentials and the classification command option.
//!
//! Settings live in a single JSON blob (by default
//! `{config_dir}/autoclass/settings.json`). Every field has a default, so a
//! missing file or a partially filled blob still loads.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::{DEFAULT_CHAT_ROLE, DEFAULT_PROMPT_TEMPLATE, EntryPolicy};
use crate::orchestrator::FailurePolicy;

/// Environment variable consulted when the blob carries no API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Errors raised while loading or storing settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file is not valid JSON: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("failed to determine configuration directory")]
    NoConfigDir,
}

/// What kind of text the model's answer is turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    #[default]
    Tag,
    Wikilink,
    FrontMatter,
    Title,
}

/// Where inline output (tags, wikilinks) is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLocation {
    #[default]
    Cursor,
    ContentTop,
    CalloutTop,
}

/// Where the `{{reference}}` candidate list comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSource {
    /// The `references` list stored in the settings.
    #[default]
    Manual,
    /// Every tag used anywhere in the vault.
    VaultTags,
    /// The title of every note in the vault.
    VaultNotes,
}

/// Configuration bundle for one classification command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandOption {
    pub prompt_template: String,
    pub chat_role: String,
    pub references: Vec<String>,
    pub reference_source: ReferenceSource,
    /// Refuse to run when the resolved reference list is empty.
    pub use_references: bool,
    /// Maximum number of categories; 0 means unlimited.
    pub max_tags: u32,
    pub model: String,
    pub max_tokens: u32,
    /// Front-matter key read by the front-matter input.
    pub input_key: String,
    /// Only read callouts of this kind (e.g. `summary`); all callouts when unset.
    pub callout_type: Option<String>,
    pub output_type: OutputType,
    pub output_location: OutputLocation,
    pub overwrite: bool,
    /// Front-matter key written by the front-matter output.
    pub output_key: String,
    pub output_prefix: String,
    pub output_suffix: String,
    /// Create an empty note for every generated name that has none yet.
    pub create_placeholders: bool,
    pub entry_policy: EntryPolicy,
    pub failure_policy: FailurePolicy,
}

impl Default for CommandOption {
    fn default() -> Self {
        Self {
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            chat_role: DEFAULT_CHAT_ROLE.to_string(),
            references: Vec::new(),
            reference_source: ReferenceSource::VaultTags,
            use_references: true,
            max_tags: 5,
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 150,
            input_key: "summary".to_string(),
            callout_type: None,
            output_type: OutputType::Tag,
            output_location: OutputLocation::Cursor,
            overwrite: false,
            output_key: "tags".to_string(),
            output_prefix: String::new(),
            output_suffix: String::new(),
            create_placeholders: true,
            entry_policy: EntryPolicy::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// The whole persisted settings blob.
#[derive(Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_key: String,
    /// Chat-completion API base URL; the client default applies when unset.
    pub base_url: Option<String>,
    pub command_option: CommandOption,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("command_option", &self.command_option)
            .finish()
    }
}

impl Settings {
    /// Returns `{config_dir}/autoclass/settings.json`.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::NoConfigDir`] if the platform has no
    /// configuration directory.
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        let config_dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
        Ok(config_dir.join("autoclass").join("settings.json"))
    }

    /// Loads settings from `path`, falling back to defaults if the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        serde_json::from_str(&raw).map_err(SettingsError::Parse)
    }

    /// Writes settings to `path`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(SettingsError::Parse)?;
        std::fs::write(path, json).map_err(io_err)
    }

    /// Resolves the API key: the stored key first, then [`API_KEY_ENV`].
    ///
    /// Returns `None` when neither yields a non-blank key.
    pub fn resolve_api_key(&self) -> Option<String> {
        if !self.api_key.trim().is_empty() {
            return Some(self.api_key.trim().to_string());
        }
        std::env::var(API_KEY_ENV)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("settings.json")).unwrap();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.command_option.output_type, OutputType::Tag);
        assert_eq!(settings.command_option.max_tags, 5);
    }

    #[test]
    fn partial_blob_fills_remaining_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"api_key": "sk-test", "command_option": {"output_type": "wikilink", "max_tags": 0}}"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();

        assert_eq!(settings.api_key, "sk-test");
        assert_eq!(settings.command_option.output_type, OutputType::Wikilink);
        assert_eq!(settings.command_option.max_tags, 0);
        assert_eq!(settings.command_option.model, "gpt-3.5-turbo");
        assert_eq!(
            settings.command_option.prompt_template,
            DEFAULT_PROMPT_TEMPLATE
        );
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            Settings::load(&path),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = Settings::default();
        settings.command_option.output_location = OutputLocation::CalloutTop;
        settings.command_option.references = vec!["rust".to_string(), "notes".to_string()];

        settings.save(&path).unwrap();

        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let settings = Settings {
            api_key: "sk-secret".to_string(),
            ..Settings::default()
        };

        let debug = format!("{settings:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    #[serial]
    fn stored_key_takes_precedence_over_environment() {
        unsafe {
            std::env::set_var(API_KEY_ENV, "sk-env");
        }

        let settings = Settings {
            api_key: "sk-stored".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.resolve_api_key().as_deref(), Some("sk-stored"));

        unsafe {
            std::env::remove_var(API_KEY_ENV);
        }
    }

    #[test]
    #[serial]
    fn environment_key_used_when_blob_is_blank() {
        unsafe {
            std::env::set_var(API_KEY_ENV, "sk-env");
        }

        let settings = Settings {
            api_key: "   ".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.resolve_api_key().as_deref(), Some("sk-env"));

        unsafe {
            std::env::remove_var(API_KEY_ENV);
        }
    }

    #[test]
    #[serial]
    fn no_key_anywhere_resolves_to_none() {
        unsafe {
            std::env::remove_var(API_KEY_ENV);
        }

        assert!(Settings::default().resolve_api_key().is_none());
    }
}
