//! Configuration management for Mangascribe.
//!
//! Handles loading, saving, and validating configuration from
//! platform-specific config directories.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name used for config directory.
const APP_NAME: &str = "Mangascribe";

/// Default config filename.
const CONFIG_FILENAME: &str = "config.toml";

/// Placeholder value for unconfigured API keys.
const API_KEY_PLACEHOLDER: &str = "YOUR_API_KEY_HERE";

/// Largest page size the chapter feed accepts.
const MAX_FEED_PAGE_SIZE: u32 = 500;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote chapter API settings.
    pub api: MangaApiConfig,

    /// Page image retrieval settings.
    pub fetching: FetchConfig,

    /// Transcription behavior settings.
    pub transcription: TranscriptionConfig,

    /// Vision model API configuration.
    pub model: ModelApiConfig,

    /// Model prompts.
    pub prompts: PromptsConfig,
}

/// How a chapter label is turned into a chapter id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ResolveStrategy {
    /// Scan the manga's full chapter feed for the label.
    #[default]
    Feed,
    /// Ask the chapter endpoint for the label directly.
    Query,
}

/// Which shape of transcription capability to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TranscriptionMode {
    /// One model call for the whole chapter, with the character bank.
    #[default]
    WholeChapter,
    /// One call per page image.
    PerPage,
}

/// Remote chapter API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MangaApiConfig {
    /// Base URL for the API.
    pub base_url: String,

    /// Translated language to filter chapters by.
    pub language: String,

    /// Default chapter resolution strategy.
    pub resolve_strategy: ResolveStrategy,

    /// Number of chapters requested per feed page.
    pub feed_page_size: u32,

    /// Number of retries for transient API failures.
    pub retries: u32,

    /// Base delay for exponential retry backoff in milliseconds.
    pub retry_backoff_ms: u64,

    /// Delay between API requests in seconds.
    pub delay_between_requests_sec: f64,

    /// Timeout for each API request in seconds.
    pub timeout_sec: u64,
}

impl Default for MangaApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mangadex.org".to_string(),
            language: "en".to_string(),
            resolve_strategy: ResolveStrategy::Feed,
            feed_page_size: 100,
            retries: 2,
            retry_backoff_ms: 500,
            delay_between_requests_sec: 0.25,
            timeout_sec: 30,
        }
    }
}

impl MangaApiConfig {
    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

/// Page image retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Maximum number of page downloads in flight.
    pub max_concurrent: usize,

    /// Minimum delay between download starts in seconds.
    pub delay_between_requests_sec: f64,

    /// Timeout for each page download in seconds.
    pub timeout_sec: u64,

    /// Number of retries for a page before it is recorded as failed.
    pub retries: u32,

    /// Base delay for exponential retry backoff in milliseconds.
    pub retry_backoff_ms: u64,

    /// Enable debug logging.
    pub debug: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            delay_between_requests_sec: 0.25,
            timeout_sec: 30,
            retries: 1,
            retry_backoff_ms: 1000,
            debug: false,
        }
    }
}

impl FetchConfig {
    /// Download timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

/// Transcription behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Whole-chapter or per-page transcription.
    pub mode: TranscriptionMode,

    /// Directory of named character reference images.
    pub character_bank_dir: Option<PathBuf>,

    /// Number of attempts per model call.
    pub retries: u32,

    /// Base delay before a repeated model call, in milliseconds.
    pub retry_backoff_ms: u64,

    /// Timeout for each model call in seconds.
    pub timeout_sec: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            mode: TranscriptionMode::WholeChapter,
            character_bank_dir: None,
            retries: 3,
            retry_backoff_ms: 2000,
            timeout_sec: 300,
        }
    }
}

/// API configuration for the vision model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelApiConfig {
    /// API key (required).
    pub key: String,

    /// Base URL for the API.
    pub base_url: String,

    /// Model identifier.
    pub model: String,
}

impl Default for ModelApiConfig {
    fn default() -> Self {
        Self {
            key: API_KEY_PLACEHOLDER.to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

impl ModelApiConfig {
    /// Checks if the API key is configured (not placeholder).
    pub fn is_configured(&self) -> bool {
        !self.key.is_empty() && self.key != API_KEY_PLACEHOLDER
    }
}

/// Model system prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Prompt for whole-chapter transcription.
    pub chapter_transcription: String,

    /// Prompt for single page transcription.
    pub page_transcription: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            chapter_transcription: r#"You transcribe manga chapters. You receive optional reference images of named characters, then the pages of one chapter in reading order, each introduced by its page number.
For every page, list the dialogue and narration in reading order, one speech bubble or caption per line. Prefix a line with "<character name>: " when the speaker matches a reference character.
Return ONLY JSON with this shape:
{"pages":[{"page":<page number>,"lines":["<line>", "..."]}]}
Include every page, using an empty list when a page has no text. No explanations."#.to_string(),
            page_transcription: "You transcribe manga pages. List the dialogue and narration on this page in reading order, one speech bubble or caption per line. Output only the transcribed lines, nothing else. Output nothing if the page has no text.".to_string(),
        }
    }
}

impl Config {
    /// Returns the platform-specific config directory path.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Returns the full path to the config file.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILENAME))
    }

    /// Loads configuration from the default location.
    ///
    /// If the config file doesn't exist, creates a default one.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Saves configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.model.is_configured() {
            return Err(ConfigError::MissingValue(
                "model.key (set your API key in config file)".to_string(),
            ));
        }

        if self.api.language.trim().is_empty() {
            return Err(invalid("api.language", "must not be empty"));
        }

        if self.api.feed_page_size == 0 || self.api.feed_page_size > MAX_FEED_PAGE_SIZE {
            return Err(invalid(
                "api.feed_page_size",
                &format!("must be between 1 and {}", MAX_FEED_PAGE_SIZE),
            ));
        }

        if self.api.timeout_sec == 0 {
            return Err(invalid("api.timeout_sec", "must be greater than 0"));
        }

        if self.fetching.max_concurrent == 0 {
            return Err(invalid("fetching.max_concurrent", "must be greater than 0"));
        }

        if self.fetching.timeout_sec == 0 {
            return Err(invalid("fetching.timeout_sec", "must be greater than 0"));
        }

        if self.transcription.retries == 0 {
            return Err(invalid("transcription.retries", "must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn configured() -> Config {
        let mut config = Config::default();
        config.model.key = "sk-real-key".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.model.is_configured());
        assert_eq!(config.api.base_url, "https://api.mangadex.org");
        assert_eq!(config.api.language, "en");
        assert_eq!(config.api.resolve_strategy, ResolveStrategy::Feed);
        assert_eq!(config.transcription.mode, TranscriptionMode::WholeChapter);
        assert_eq!(config.fetching.max_concurrent, 4);
    }

    #[test]
    fn test_config_round_trip() {
        let mut config = configured();
        config.transcription.mode = TranscriptionMode::PerPage;
        config.transcription.character_bank_dir = Some(PathBuf::from("/tmp/bank"));
        let file = NamedTempFile::new().unwrap();

        config.save_to(file.path()).unwrap();

        let loaded = Config::load_from(file.path()).unwrap();
        assert_eq!(loaded.model.key, "sk-real-key");
        assert_eq!(loaded.transcription.mode, TranscriptionMode::PerPage);
        assert_eq!(
            loaded.transcription.character_bank_dir,
            Some(PathBuf::from("/tmp/bank"))
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            "[api]\nresolve_strategy = \"query\"\n\n[transcription]\nmode = \"per-page\"\n",
        )
        .unwrap();

        let loaded = Config::load_from(file.path()).unwrap();
        assert_eq!(loaded.api.resolve_strategy, ResolveStrategy::Query);
        assert_eq!(loaded.api.language, "en");
        assert_eq!(loaded.transcription.mode, TranscriptionMode::PerPage);
        assert_eq!(loaded.fetching.timeout_sec, 30);
    }

    #[test]
    fn test_missing_file_creates_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILENAME);

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert!(!config.model.is_configured());
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_err()); // API key not set
        assert!(configured().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let mut config = configured();
        config.fetching.max_concurrent = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("fetching.max_concurrent"));
    }

    #[test]
    fn test_rejects_oversized_feed_page() {
        let mut config = configured();
        config.api.feed_page_size = 1000;
        assert!(config.validate().is_err());
    }
}
