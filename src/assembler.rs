//! Concurrent, rate-limited download of every page of a chapter.
//!
//! A single page failing never aborts the chapter: the failure is recorded,
//! the page is left out of the image list and every other page still gets
//! its chance.

use crate::config::FetchConfig;
use crate::console::Console;
use crate::error::{ApiError, FetchError};
use crate::fetcher::{ImageFetcher, PageImage};
use crate::mangadex::{ChapterId, PageLocator, PageRef};
use crate::utils::{RequestPacer, backoff_delay};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// Result of downloading a chapter.
#[derive(Debug)]
pub struct AssembledChapter {
    /// Number of pages the chapter declares.
    pub page_count: usize,
    /// Successfully decoded pages, ascending by index. May have gaps.
    pub pages: Vec<PageImage>,
    /// One entry per page that could not be retrieved, ascending by index.
    pub failures: Vec<FetchError>,
}

impl AssembledChapter {
    /// Indices of pages that failed.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }

    /// Returns true if every declared page was retrieved.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Downloads all pages of a chapter with bounded concurrency and pacing.
pub struct ChapterAssembler {
    locator: PageLocator,
    fetcher: Box<dyn ImageFetcher>,
    config: FetchConfig,
    console: Console,
}

impl ChapterAssembler {
    /// Creates a new assembler.
    pub fn new(
        locator: PageLocator,
        fetcher: Box<dyn ImageFetcher>,
        config: FetchConfig,
        console: Console,
    ) -> Self {
        Self {
            locator,
            fetcher,
            config,
            console,
        }
    }

    /// Locates and downloads every page of the chapter.
    ///
    /// Only a failed page lookup is an error; page failures are reported in
    /// the returned [`AssembledChapter`].
    pub async fn assemble(&self, chapter_id: &ChapterId) -> Result<AssembledChapter, ApiError> {
        let pages = self.locator.locate(chapter_id).await?;
        self.console
            .info(&format!("Chapter has {} pages", self.console.count(pages.len())));

        Ok(fetch_pages(self.fetcher.as_ref(), &pages, &self.config, &self.console).await)
    }
}

/// Fetches `pages` concurrently and sorts the outcomes back into page order.
pub async fn fetch_pages(
    fetcher: &dyn ImageFetcher,
    pages: &[PageRef],
    config: &FetchConfig,
    console: &Console,
) -> AssembledChapter {
    let semaphore = Semaphore::new(config.max_concurrent.max(1));
    let pacer = RequestPacer::new(config.delay_between_requests_sec);
    let completed = AtomicUsize::new(0);
    let total = pages.len();

    let tasks = pages.iter().map(|page| {
        let semaphore = &semaphore;
        let pacer = &pacer;
        let completed = &completed;
        async move {
            let permit = semaphore.acquire().await;
            let result = fetch_with_retry(fetcher, page, pacer, config, console).await;
            drop(permit);

            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            match &result {
                Ok(_) => console.progress_update(&format!(
                    "{} fetched ({}/{} done)",
                    console.page_info(page.index, total),
                    done,
                    total
                )),
                Err(e) => {
                    console.progress_done();
                    console.warning(&e.to_string());
                }
            }
            result
        }
    });

    // join_all keeps input order, so each page owns the slot at its position.
    let results = futures::future::join_all(tasks).await;
    console.progress_done();

    let mut images = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(image) => images.push(image),
            Err(e) => failures.push(e),
        }
    }
    images.sort_by_key(|p| p.index);
    failures.sort_by_key(|f| f.index);

    AssembledChapter {
        page_count: total,
        pages: images,
        failures,
    }
}

async fn fetch_with_retry(
    fetcher: &dyn ImageFetcher,
    page: &PageRef,
    pacer: &RequestPacer,
    config: &FetchConfig,
    console: &Console,
) -> Result<PageImage, FetchError> {
    let mut attempt = 0;

    loop {
        pacer.wait().await;
        match fetcher.fetch(page).await {
            Ok(image) => return Ok(image),
            Err(e) if e.cause.is_retryable() && attempt < config.retries => {
                attempt += 1;
                console.debug(&format!("{}, retry {}/{}", e, attempt, config.retries));
                tokio::time::sleep(backoff_delay(config.retry_backoff_ms, attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchFailure;
    use async_trait::async_trait;
    use image::RgbImage;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fetcher that fails on chosen indices and tracks concurrency.
    #[derive(Default)]
    struct ScriptedFetcher {
        fail: HashSet<usize>,
        transient_failures: Mutex<HashMap<usize, u32>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn failing(indices: &[usize]) -> Self {
            Self {
                fail: indices.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ImageFetcher for ScriptedFetcher {
        async fn fetch(&self, page: &PageRef) -> Result<PageImage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            // Later pages finish first so completion order differs from page order.
            let delay = 5 * (10 - page.index.min(9) as u64);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let transient = {
                let mut remaining = self.transient_failures.lock().unwrap();
                match remaining.get_mut(&page.index) {
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        true
                    }
                    _ => false,
                }
            };

            if transient {
                return Err(FetchError {
                    index: page.index,
                    url: page.url.clone(),
                    cause: FetchFailure::Status(503),
                });
            }
            if self.fail.contains(&page.index) {
                return Err(FetchError {
                    index: page.index,
                    url: page.url.clone(),
                    cause: FetchFailure::Status(404),
                });
            }
            Ok(PageImage::new(page.index, RgbImage::new(1, 1)))
        }
    }

    fn pages(n: usize) -> Vec<PageRef> {
        (0..n)
            .map(|index| PageRef {
                index,
                url: format!("https://cdn.example/data/h/{}.png", index),
            })
            .collect()
    }

    fn config(max_concurrent: usize) -> FetchConfig {
        FetchConfig {
            max_concurrent,
            delay_between_requests_sec: 0.0,
            retries: 0,
            retry_backoff_ms: 0,
            ..FetchConfig::default()
        }
    }

    fn quiet() -> Console {
        Console::with_colors(false)
    }

    #[tokio::test]
    async fn test_partial_failures_keep_order_and_account_for_every_page() {
        let fetcher = ScriptedFetcher::failing(&[1, 4]);
        let chapter = fetch_pages(&fetcher, &pages(6), &config(3), &quiet()).await;

        let fetched: Vec<usize> = chapter.pages.iter().map(|p| p.index).collect();
        assert_eq!(fetched, vec![0, 2, 3, 5]);
        assert_eq!(chapter.failed_indices(), vec![1, 4]);
        assert_eq!(chapter.pages.len() + chapter.failures.len(), chapter.page_count);
        assert!(!chapter.is_complete());
    }

    #[tokio::test]
    async fn test_every_page_failing_still_completes() {
        let fetcher = ScriptedFetcher::failing(&[0, 1, 2]);
        let chapter = fetch_pages(&fetcher, &pages(3), &config(2), &quiet()).await;

        assert!(chapter.pages.is_empty());
        assert_eq!(chapter.failed_indices(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let fetcher = ScriptedFetcher::default();
        let chapter = fetch_pages(&fetcher, &pages(10), &config(3), &quiet()).await;

        assert_eq!(chapter.pages.len(), 10);
        let max = fetcher.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "saw {max} fetches in flight");
        assert!(max >= 2, "fetches never overlapped");
    }

    #[tokio::test]
    async fn test_pacing_spaces_fetch_starts() {
        let fetcher = ScriptedFetcher::default();
        let mut paced = config(10);
        paced.delay_between_requests_sec = 0.03;

        let started = std::time::Instant::now();
        fetch_pages(&fetcher, &pages(4), &paced, &quiet()).await;
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let fetcher = ScriptedFetcher::default();
        fetcher.transient_failures.lock().unwrap().insert(2, 1);
        let mut retrying = config(2);
        retrying.retries = 1;

        let chapter = fetch_pages(&fetcher, &pages(3), &retrying, &quiet()).await;
        assert!(chapter.is_complete());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let fetcher = ScriptedFetcher::failing(&[0]);
        let mut retrying = config(1);
        retrying.retries = 3;

        let chapter = fetch_pages(&fetcher, &pages(1), &retrying, &quiet()).await;
        assert_eq!(chapter.failed_indices(), vec![0]);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_chapter() {
        let fetcher = ScriptedFetcher::default();
        let chapter = fetch_pages(&fetcher, &[], &config(2), &quiet()).await;
        assert_eq!(chapter.page_count, 0);
        assert!(chapter.pages.is_empty());
        assert!(chapter.is_complete());
    }

    #[tokio::test]
    async fn test_http_pages_retry_server_errors_but_not_missing_files() {
        use crate::fetcher::HttpImageFetcher;
        use crate::fetcher::tests::gray_png;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/h/0.png"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/h/0.png"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(gray_png(2, 2), "image/png"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/h/1.png"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let refs: Vec<PageRef> = (0..2)
            .map(|index| PageRef {
                index,
                url: format!("{}/data/h/{}.png", server.uri(), index),
            })
            .collect();
        let mut retrying = config(2);
        retrying.retries = 2;

        let fetcher = HttpImageFetcher::new(Duration::from_secs(5)).unwrap();
        let chapter = fetch_pages(&fetcher, &refs, &retrying, &quiet()).await;

        let fetched: Vec<usize> = chapter.pages.iter().map(|p| p.index).collect();
        assert_eq!(fetched, vec![0]);
        assert_eq!(chapter.failed_indices(), vec![1]);
        assert!(matches!(chapter.failures[0].cause, FetchFailure::Status(404)));
    }
}
