//! Transcription through an OpenAI-compatible vision chat API.
//!
//! Pages are uploaded as base64 PNG data URLs. Per-page calls get plain text
//! back, one line per bubble; whole-chapter calls ask for a JSON document
//! keyed by page number.

use super::{CharacterBank, ChapterModel, PageOcr, PageTranscription};
use crate::config::{ModelApiConfig, PromptsConfig, TranscriptionConfig};
use crate::console::Console;
use crate::error::TranscriptionError;
use crate::fetcher::{PageImage, encode_png};
use crate::utils::backoff_delay;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::RgbImage;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

/// Regex to extract JSON from markdown code fences.
static CODE_FENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").expect("Invalid CODE_FENCE_REGEX")
});

/// Refusal phrases that indicate the model declined to transcribe.
static REFUSAL_PHRASES: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    vec![
        "i'm sorry",
        "i cannot",
        "i can't",
        "i am unable",
        "as an ai",
        "my apologies",
    ]
});

/// Request body for the chat completions API.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
}

/// A message in the conversation.
#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentPart>,
}

/// One part of a multimodal message.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

/// Response from the chat completions API.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

/// A single choice in the response.
#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

/// Message content in a response.
#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Whole-chapter reply shape.
#[derive(Debug, Deserialize)]
struct ParsedChapter {
    pages: Vec<ParsedPage>,
}

/// One page in a whole-chapter reply. `page` is 1-based.
#[derive(Debug, Deserialize)]
struct ParsedPage {
    page: usize,
    #[serde(default)]
    lines: Vec<String>,
}

/// Vision model client usable in both transcription shapes.
pub struct VisionModel {
    /// HTTP client for API requests.
    client: Client,
    /// API configuration.
    api_config: ModelApiConfig,
    /// System prompts.
    prompts: PromptsConfig,
    /// Number of attempts per call.
    retries: u32,
    /// Base delay before a repeated call.
    retry_backoff_ms: u64,
    /// Console for output.
    console: Console,
}

impl VisionModel {
    /// Create a new VisionModel.
    pub fn new(
        api_config: ModelApiConfig,
        prompts: PromptsConfig,
        transcription_config: &TranscriptionConfig,
        console: Console,
    ) -> Result<Self, TranscriptionError> {
        if !api_config.is_configured() {
            return Err(TranscriptionError::InvalidConfig(
                "model.key is not set".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(transcription_config.timeout_sec))
            .build()?;

        Ok(Self {
            client,
            api_config,
            prompts,
            retries: transcription_config.retries.max(1),
            retry_backoff_ms: transcription_config.retry_backoff_ms,
            console,
        })
    }

    /// Sends the request, retrying failed or unparsable replies with exponential backoff.
    async fn complete_with_retry<T>(
        &self,
        request: &ChatRequest,
        parse: impl Fn(&str) -> Result<T, TranscriptionError>,
    ) -> Result<T, TranscriptionError> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match self.complete(request).await {
                Ok(raw) => parse(&raw),
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retries => {
                    let delay = backoff_delay(self.retry_backoff_ms, attempt);
                    self.console.warning(&format!(
                        "Transcription failed ({}), retrying in {:?} (attempt {}/{})",
                        e,
                        delay,
                        attempt + 1,
                        self.retries
                    ));
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(TranscriptionError::RetriesExhausted {
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
            }
        }
    }

    /// Makes one chat completion call and returns the reply text.
    async fn complete(&self, request: &ChatRequest) -> Result<String, TranscriptionError> {
        let url = format!(
            "{}/chat/completions",
            self.api_config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_config.key))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::ApiError(format!(
                "HTTP {}: {}",
                status, text
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::ParseError(e.to_string()))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(content)
    }

    fn system_message(prompt: &str) -> Message {
        Message {
            role: "system",
            content: vec![ContentPart::Text {
                text: prompt.to_string(),
            }],
        }
    }
}

#[async_trait]
impl ChapterModel for VisionModel {
    fn name(&self) -> &'static str {
        "vision model"
    }

    async fn predict(
        &self,
        pages: &[PageImage],
        bank: &CharacterBank,
    ) -> Result<Vec<PageTranscription>, TranscriptionError> {
        let mut content = Vec::with_capacity(2 * (pages.len() + bank.len()));

        for character in bank.entries() {
            content.push(ContentPart::Text {
                text: format!("Reference character: {}", character.name),
            });
            content.push(image_part(&character.image)?);
        }
        for page in pages {
            content.push(ContentPart::Text {
                text: format!("Page {}", page.index + 1),
            });
            content.push(image_part(&page.pixels)?);
        }

        let request = ChatRequest {
            model: self.api_config.model.clone(),
            messages: vec![
                Self::system_message(&self.prompts.chapter_transcription),
                Message {
                    role: "user",
                    content,
                },
            ],
        };

        self.complete_with_retry(&request, parse_chapter_or_refusal)
            .await
    }
}

#[async_trait]
impl PageOcr for VisionModel {
    fn name(&self) -> &'static str {
        "vision model"
    }

    async fn transcribe(&self, page: &PageImage) -> Result<Vec<String>, TranscriptionError> {
        let request = ChatRequest {
            model: self.api_config.model.clone(),
            messages: vec![
                Self::system_message(&self.prompts.page_transcription),
                Message {
                    role: "user",
                    content: vec![image_part(&page.pixels)?],
                },
            ],
        };

        self.complete_with_retry(&request, |raw| Ok(split_lines(raw)))
            .await
    }
}

/// Encodes an image as a PNG data URL content part.
fn image_part(pixels: &RgbImage) -> Result<ContentPart, TranscriptionError> {
    let png = encode_png(pixels)?;
    Ok(ContentPart::ImageUrl {
        image_url: ImageUrl {
            url: format!("data:image/png;base64,{}", STANDARD.encode(png)),
        },
    })
}

fn check_refusal(content: &str) -> Result<(), TranscriptionError> {
    let lower = content.trim().to_lowercase();
    match REFUSAL_PHRASES.iter().find(|p| lower.starts_with(*p)) {
        Some(phrase) => Err(TranscriptionError::Refused(format!(
            "Response starts with refusal phrase: {}",
            phrase
        ))),
        None => Ok(()),
    }
}

/// Splits a reply into trimmed, non-empty lines.
fn split_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses a whole-chapter reply. Prose that opens with a refusal phrase is
/// reported as a refusal instead of a parse error.
///
/// Per-page replies are page text and never go through this check.
fn parse_chapter_or_refusal(raw: &str) -> Result<Vec<PageTranscription>, TranscriptionError> {
    match parse_chapter_reply(raw) {
        Ok(pages) => Ok(pages),
        Err(e) => {
            check_refusal(raw)?;
            Err(e)
        }
    }
}

/// Parses the whole-chapter JSON reply, tolerating markdown code fences.
fn parse_chapter_reply(raw: &str) -> Result<Vec<PageTranscription>, TranscriptionError> {
    let trimmed = raw.trim();
    let json = CODE_FENCE_REGEX
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |m| m.as_str());

    let parsed: ParsedChapter =
        serde_json::from_str(json).map_err(|e| TranscriptionError::ParseError(e.to_string()))?;

    Ok(parsed
        .pages
        .into_iter()
        .filter(|p| p.page > 0)
        .map(|p| PageTranscription {
            index: p.page - 1,
            lines: p
                .lines
                .iter()
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        })
        .collect())
}
