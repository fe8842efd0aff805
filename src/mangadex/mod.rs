//! Client for the MangaDex REST API.
//!
//! Holds the shared HTTP client, request pacing and retry policy used by the
//! chapter resolver and the page locator.

mod pages;
mod resolver;

pub use pages::{PageLocator, PageRef};
pub use resolver::{ChapterId, ChapterQuery, ChapterResolver};

use crate::config::MangaApiConfig;
use crate::console::Console;
use crate::error::ApiError;
use crate::utils::{RequestPacer, backoff_delay, check_response_status, create_http_client};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use url::Url;

/// Upper bound on feed requests for one manga.
const MAX_FEED_PAGES: u32 = 100;

/// One page of a chapter listing (`/manga/{id}/feed` or `/chapter`).
#[derive(Debug, Deserialize)]
struct ChapterListResponse {
    data: Vec<ChapterData>,
    #[serde(default)]
    total: Option<u32>,
}

/// A chapter entity in a listing.
#[derive(Debug, Deserialize)]
struct ChapterData {
    id: String,
    attributes: ChapterAttributes,
}

/// Chapter attributes we care about. Oneshots have no chapter label.
#[derive(Debug, Deserialize)]
struct ChapterAttributes {
    chapter: Option<String>,
}

/// Delivery handshake response from `/at-home/server/{chapterId}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHomeResponse {
    base_url: Option<String>,
    chapter: Option<AtHomeChapter>,
}

/// Chapter content description inside the handshake.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
struct AtHomeChapter {
    hash: Option<String>,
    data: Option<Vec<String>>,
    #[serde(default)]
    data_saver: Vec<String>,
}

/// Shared MangaDex API client.
///
/// Cheap to clone; clones share the connection pool and request pacer.
#[derive(Clone)]
pub struct MangaDexClient {
    client: reqwest::Client,
    config: MangaApiConfig,
    pacer: Arc<RequestPacer>,
    console: Console,
}

impl MangaDexClient {
    /// Creates a new client with the given configuration.
    pub fn new(config: MangaApiConfig, console: Console) -> Result<Self, ApiError> {
        let client = create_http_client(config.timeout())?;
        let pacer = Arc::new(RequestPacer::new(config.delay_between_requests_sec));

        Ok(Self {
            client,
            config,
            pacer,
            console,
        })
    }

    /// Returns the configured translated language.
    pub fn language(&self) -> &str {
        &self.config.language
    }

    /// Builds an absolute endpoint URL from path segments and query pairs.
    fn endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, ApiError> {
        let mut url = Url::parse(self.config.base_url.trim_end_matches('/'))
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", self.config.base_url, e)))?;

        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.config.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);

        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        Ok(url)
    }

    /// Performs a paced GET and decodes the JSON body, retrying transient failures.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let mut attempt = 0;

        loop {
            match self.get_json_once(url.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.config.retry_backoff_ms, attempt);
                    self.console.warning(&format!(
                        "{}, retrying in {:?} (attempt {}/{})",
                        e,
                        delay,
                        attempt + 1,
                        self.config.retries + 1
                    ));
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_json_once<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        self.pacer.wait().await;
        self.console.debug(&format!("GET {}", url));

        let response = self.client.get(url).send().await?;
        let response = check_response_status(response)?;
        let text = response.text().await?;

        serde_json::from_str(&text).map_err(|e| ApiError::ParseError(e.to_string()))
    }

    /// Reads the manga's whole chapter feed in ascending chapter order.
    async fn chapter_feed(&self, manga_id: &str) -> Result<Vec<ChapterData>, ApiError> {
        let limit = self.config.feed_page_size.max(1);
        let mut chapters = Vec::new();
        let mut offset = 0u32;
        let mut complete = false;

        for _ in 0..MAX_FEED_PAGES {
            let limit_str = limit.to_string();
            let offset_str = offset.to_string();
            let url = self.endpoint(
                &["manga", manga_id, "feed"],
                &[
                    ("translatedLanguage[]", self.language()),
                    ("order[chapter]", "asc"),
                    ("limit", limit_str.as_str()),
                    ("offset", offset_str.as_str()),
                ],
            )?;

            let page: ChapterListResponse = self.get_json(url).await?;
            let received = page.data.len() as u32;
            chapters.extend(page.data);
            offset += received;

            let exhausted = match page.total {
                Some(total) => offset >= total,
                None => received < limit,
            };
            if received == 0 || exhausted {
                complete = true;
                break;
            }
        }

        if !complete {
            self.console.warning(&format!(
                "Chapter feed of manga {} stopped after {} requests ({} chapters); later chapters are missing",
                manga_id,
                MAX_FEED_PAGES,
                chapters.len()
            ));
        }

        Ok(chapters)
    }

    /// Queries the chapter collection for one label of one manga.
    async fn query_chapters(
        &self,
        manga_id: &str,
        label: &str,
    ) -> Result<Vec<ChapterData>, ApiError> {
        let url = self.endpoint(
            &["chapter"],
            &[
                ("manga", manga_id),
                ("chapters[]", label),
                ("translatedLanguage[]", self.language()),
            ],
        )?;

        let page: ChapterListResponse = self.get_json(url).await?;
        Ok(page.data)
    }

    /// Performs the delivery handshake for a chapter.
    async fn at_home(&self, chapter_id: &str) -> Result<AtHomeResponse, ApiError> {
        let url = self.endpoint(&["at-home", "server", chapter_id], &[])?;
        self.get_json(url).await
    }
}
