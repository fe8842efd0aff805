//! Page URL enumeration through the MangaDex@Home delivery handshake.

use super::MangaDexClient;
use super::resolver::ChapterId;
use crate::error::ApiError;

const ENDPOINT: &str = "at-home";

/// One page of a chapter, in declared page order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    /// Zero-based page index.
    pub index: usize,
    /// Absolute image URL.
    pub url: String,
}

/// Turns a chapter id into the ordered list of its page image URLs.
pub struct PageLocator {
    client: MangaDexClient,
}

impl PageLocator {
    /// Creates a locator backed by `client`.
    pub fn new(client: MangaDexClient) -> Self {
        Self { client }
    }

    /// Returns every page of the chapter in filename order.
    ///
    /// Always uses the full-quality file list, never the data-saver one.
    pub async fn locate(&self, chapter_id: &ChapterId) -> Result<Vec<PageRef>, ApiError> {
        let handshake = self.client.at_home(chapter_id.as_str()).await?;

        let base_url = handshake.base_url.ok_or(ApiError::MissingField {
            endpoint: ENDPOINT,
            field: "baseUrl",
        })?;
        let chapter = handshake.chapter.ok_or(ApiError::MissingField {
            endpoint: ENDPOINT,
            field: "chapter",
        })?;
        let hash = chapter.hash.ok_or(ApiError::MissingField {
            endpoint: ENDPOINT,
            field: "chapter.hash",
        })?;
        let filenames = chapter.data.ok_or(ApiError::MissingField {
            endpoint: ENDPOINT,
            field: "chapter.data",
        })?;

        url::Url::parse(&base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        self.client.console.debug(&format!(
            "Chapter {} served from {} ({} pages)",
            chapter_id,
            base_url,
            filenames.len()
        ));

        Ok(page_refs(&base_url, &hash, &filenames))
    }
}

/// Composes `{base_url}/data/{hash}/{filename}` for each filename, keeping order.
fn page_refs(base_url: &str, hash: &str, filenames: &[String]) -> Vec<PageRef> {
    let base_url = base_url.trim_end_matches('/');
    filenames
        .iter()
        .enumerate()
        .map(|(index, filename)| PageRef {
            index,
            url: format!("{}/data/{}/{}", base_url, hash, filename),
        })
        .collect()
}
