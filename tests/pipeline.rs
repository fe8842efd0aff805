//! End-to-end chapter runs against a mocked MangaDex API and image host.

use async_trait::async_trait;
use image::{Luma, RgbImage};
use mangascribe::config::{FetchConfig, MangaApiConfig};
use mangascribe::{
    ChapterAssembler, ChapterModel, ChapterPipeline, ChapterQuery, ChapterResolver, CharacterBank,
    Console, HttpImageFetcher, MangaDexClient, PageImage, PageLocator, PageOcr, PageStatus,
    PageTranscription, PipelineError, ResolveError, ResolveStrategy, TranscriptionAdapter,
    TranscriptionError,
};
use serde_json::json;
use std::io::Cursor;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MANGA_ID: &str = "m1";

/// Reads a page as a single line naming its index.
struct IndexOcr;

#[async_trait]
impl PageOcr for IndexOcr {
    fn name(&self) -> &'static str {
        "index-ocr"
    }

    async fn transcribe(&self, page: &PageImage) -> Result<Vec<String>, TranscriptionError> {
        Ok(vec![format!("Hello from page {}", page.index + 1)])
    }
}

/// Answers for every page it receives, plus one page that was never sent.
struct GreedyModel;

#[async_trait]
impl ChapterModel for GreedyModel {
    fn name(&self) -> &'static str {
        "greedy"
    }

    async fn predict(
        &self,
        pages: &[PageImage],
        _bank: &CharacterBank,
    ) -> Result<Vec<PageTranscription>, TranscriptionError> {
        let mut records: Vec<PageTranscription> = pages
            .iter()
            .map(|p| PageTranscription {
                index: p.index,
                lines: vec![format!("Bubble {}", p.index + 1), "...".to_string()],
            })
            .collect();
        records.push(PageTranscription {
            index: 1,
            lines: vec!["hallucinated".to_string()],
        });
        Ok(records)
    }
}

fn gray_png() -> Vec<u8> {
    let img = image::GrayImage::from_pixel(4, 6, Luma([200]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

async fn mount_chapter(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/manga/{}/feed", MANGA_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "ok",
            "data": [
                { "id": "ch1", "type": "chapter", "attributes": { "chapter": "1" } },
                { "id": "ch2", "type": "chapter", "attributes": { "chapter": "2" } }
            ],
            "limit": 100,
            "offset": 0,
            "total": 2
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/at-home/server/ch2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "ok",
            "baseUrl": server.uri(),
            "chapter": {
                "hash": "h2",
                "data": ["1-a.png", "2-b.png", "3-c.png"],
                "dataSaver": ["1-a.jpg", "2-b.jpg", "3-c.jpg"]
            }
        })))
        .mount(server)
        .await;

    for file in ["1-a.png", "3-c.png"] {
        Mock::given(method("GET"))
            .and(path(format!("/data/h2/{}", file)))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(gray_png()),
            )
            .mount(server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/data/h2/2-b.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

fn pipeline_for(server: &MockServer, adapter: TranscriptionAdapter) -> ChapterPipeline {
    let console = Console::with_colors(false);
    let api = MangaApiConfig {
        base_url: server.uri(),
        delay_between_requests_sec: 0.0,
        retries: 0,
        ..MangaApiConfig::default()
    };
    let fetching = FetchConfig {
        delay_between_requests_sec: 0.0,
        retries: 0,
        ..FetchConfig::default()
    };

    let client = MangaDexClient::new(api, console.clone()).unwrap();
    let fetcher = HttpImageFetcher::new(Duration::from_secs(5)).unwrap();
    ChapterPipeline::new(
        ChapterResolver::new(client.clone(), ResolveStrategy::Feed),
        ChapterAssembler::new(
            PageLocator::new(client),
            Box::new(fetcher),
            fetching,
            console.clone(),
        ),
        adapter,
        console,
    )
}

#[tokio::test]
async fn test_missing_page_leaves_empty_block_in_place() {
    let server = MockServer::start().await;
    mount_chapter(&server).await;

    let pipeline = pipeline_for(&server, TranscriptionAdapter::PerPage(Box::new(IndexOcr)));
    let run = pipeline
        .run(&ChapterQuery::new(MANGA_ID, "2"))
        .await
        .unwrap();

    assert_eq!(run.chapter_id.as_str(), "ch2");
    assert_eq!(run.fetch_failures.len(), 1);
    assert_eq!(run.fetch_failures[0].index, 1);

    let pages = run.transcript.pages();
    assert_eq!(pages.len(), 3);
    assert_eq!(pages[0].lines, vec!["Hello from page 1"]);
    assert!(pages[1].lines.is_empty());
    assert_eq!(pages[1].status, PageStatus::FetchFailed);
    assert_eq!(pages[2].lines, vec!["Hello from page 3"]);

    assert_eq!(
        run.transcript.render(),
        "--- Page 1 ---\nHello from page 1\n\n\
         --- Page 2 ---\n\n\
         --- Page 3 ---\nHello from page 3\n\n"
    );
}

#[tokio::test]
async fn test_whole_chapter_output_cannot_fill_unfetched_page() {
    let server = MockServer::start().await;
    mount_chapter(&server).await;

    let adapter = TranscriptionAdapter::WholeChapter {
        model: Box::new(GreedyModel),
        bank: CharacterBank::new(vec![mangascribe::CharacterRef {
            name: "Alice".to_string(),
            image: RgbImage::new(2, 2),
        }]),
    };
    let run = pipeline_for(&server, adapter)
        .run(&ChapterQuery::new(MANGA_ID, "2"))
        .await
        .unwrap();

    let pages = run.transcript.pages();
    assert_eq!(pages[0].lines, vec!["Bubble 1", "..."]);
    assert_eq!(pages[1].status, PageStatus::FetchFailed);
    assert!(pages[1].lines.is_empty());
    assert_eq!(pages[2].lines, vec!["Bubble 3", "..."]);
    assert_eq!(run.transcript.gaps(), vec![1]);
}

#[tokio::test]
async fn test_unknown_chapter_downloads_nothing() {
    let server = MockServer::start().await;
    mount_chapter(&server).await;

    let pipeline = pipeline_for(&server, TranscriptionAdapter::PerPage(Box::new(IndexOcr)));
    let err = pipeline
        .run(&ChapterQuery::new(MANGA_ID, "7"))
        .await
        .unwrap_err();

    match err {
        PipelineError::Resolve(ResolveError::NotFound { available, .. }) => {
            assert_eq!(available, vec!["1", "2"]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let requests = server.received_requests().await.unwrap();
    assert!(
        requests
            .iter()
            .all(|r| !r.url.path().starts_with("/at-home") && !r.url.path().starts_with("/data"))
    );
}
