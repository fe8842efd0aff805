//! Retrieval and decoding of single page images.

use crate::error::{FetchError, FetchFailure};
use crate::mangadex::PageRef;
use crate::utils::create_http_client;
use async_trait::async_trait;
use image::RgbImage;
use std::io::Cursor;
use std::time::Duration;

/// A decoded page, normalized to 8-bit RGB.
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    /// Zero-based page index.
    pub index: usize,
    /// Pixel buffer; grayscale and alpha sources are converted to RGB.
    pub pixels: RgbImage,
}

impl PageImage {
    /// Creates a page from an already decoded buffer.
    pub fn new(index: usize, pixels: RgbImage) -> Self {
        Self { index, pixels }
    }

    /// Decodes raw image bytes of any supported format.
    pub fn decode(index: usize, bytes: &[u8]) -> Result<Self, image::ImageError> {
        let decoded = image::load_from_memory(bytes)?;
        Ok(Self::new(index, decoded.to_rgb8()))
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Encodes the page as PNG, e.g. for upload to a model.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        encode_png(&self.pixels)
    }
}

/// Encodes an RGB buffer as PNG bytes.
pub fn encode_png(pixels: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    pixels.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}

/// Unit of work for one page: download and decode.
///
/// Implementations never pace themselves; the caller decides how many
/// fetches run at once and how fast they start.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetches and decodes one page.
    async fn fetch(&self, page: &PageRef) -> Result<PageImage, FetchError>;
}

/// Fetches page images over HTTP.
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    /// Creates a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: create_http_client(timeout)?,
        })
    }

    async fn try_fetch(&self, page: &PageRef) -> Result<PageImage, FetchFailure> {
        let response = self.client.get(&page.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        let index = page.index;

        tokio::task::spawn_blocking(move || PageImage::decode(index, &bytes))
            .await
            .map_err(|e| FetchFailure::Task(e.to_string()))?
            .map_err(FetchFailure::from)
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, page: &PageRef) -> Result<PageImage, FetchError> {
        self.try_fetch(page).await.map_err(|cause| FetchError {
            index: page.index,
            url: page.url.clone(),
            cause,
        })
    }
}
