//! Error types for the Mangascribe application.
//!
//! Uses `thiserror` for structured error definitions that provide
//! clear context about what went wrong.

use thiserror::Error;

/// Error type for calls against the remote chapter API.
///
/// Everything here is transient from the user's point of view: re-running
/// the command may succeed.
#[derive(Error, Debug)]
pub enum ApiError {
    /// HTTP request failed (connect, timeout, body read)
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API answered with a non-2xx status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Failed to parse the response body
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// URL building or validation failed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A required field was absent from the response
    #[error("Missing '{field}' in {endpoint} response")]
    MissingField {
        endpoint: &'static str,
        field: &'static str,
    },
}

impl ApiError {
    /// Returns true if repeating the request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::HttpError(e) => e.is_timeout() || e.is_connect(),
            ApiError::Status { status, .. } => crate::utils::is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Error type for chapter resolution.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The chapter label does not exist for this manga and language
    #[error(
        "Chapter '{label}' not found for manga {manga_id} (available: {})",
        format_labels(.available)
    )]
    NotFound {
        manga_id: String,
        label: String,
        available: Vec<String>,
    },

    /// The lookup itself failed
    #[error("Chapter lookup failed: {0}")]
    Transient(#[from] ApiError),
}

fn format_labels(labels: &[String]) -> String {
    if labels.is_empty() {
        "none".to_string()
    } else {
        labels.join(", ")
    }
}

/// Failure to retrieve or decode a single page.
#[derive(Error, Debug)]
#[error("Failed to fetch page {} from {url}: {cause}", .index + 1)]
pub struct FetchError {
    /// Zero-based page index.
    pub index: usize,
    /// Image URL that was requested.
    pub url: String,
    /// What went wrong.
    pub cause: FetchFailure,
}

/// Underlying cause of a [`FetchError`].
#[derive(Error, Debug)]
pub enum FetchFailure {
    /// Network level failure, including timeouts
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx status from the image server
    #[error("HTTP {0}")]
    Status(u16),

    /// The bytes were not a decodable image
    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),

    /// The blocking decode task panicked or was cancelled
    #[error("decode task failed: {0}")]
    Task(String),
}

impl FetchFailure {
    /// Returns true if another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchFailure::Http(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            FetchFailure::Status(status) => crate::utils::is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Error type for configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Missing required configuration value
    #[error("Missing required config value: {0}")]
    MissingValue(String),

    /// Invalid configuration value
    #[error("Invalid config value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Config directory not found
    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Error type for transcription operations.
#[derive(Error, Debug)]
pub enum TranscriptionError {
    /// HTTP request to the model API failed
    #[error("API request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error: {0}")]
    ApiError(String),

    /// Failed to parse the model's reply
    #[error("Failed to parse model response: {0}")]
    ParseError(String),

    /// The model declined the request
    #[error("Transcription refused: {0}")]
    Refused(String),

    /// A page or reference image could not be encoded for upload
    #[error("Failed to encode image: {0}")]
    EncodeError(#[from] image::ImageError),

    /// All retry attempts exhausted
    #[error("All retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Invalid API configuration
    #[error("Invalid API configuration: {0}")]
    InvalidConfig(String),

    /// The character bank directory could not be loaded
    #[error("Failed to load character bank: {0}")]
    CharacterBank(String),
}

/// Errors that abort a whole chapter run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The chapter could not be resolved
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The page list could not be obtained
    #[error("Failed to locate chapter pages: {0}")]
    Locate(#[from] ApiError),
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
