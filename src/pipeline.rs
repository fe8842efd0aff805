//! One chapter, end to end: resolve, fetch, transcribe, assemble.

use crate::assembler::ChapterAssembler;
use crate::console::Console;
use crate::error::{FetchError, PipelineError};
use crate::mangadex::{ChapterId, ChapterQuery, ChapterResolver};
use crate::transcript::Transcript;
use crate::transcription::TranscriptionAdapter;

/// Outcome of a chapter run.
#[derive(Debug)]
pub struct ChapterRun {
    /// The chapter that was transcribed.
    pub chapter_id: ChapterId,
    /// One entry per declared page.
    pub transcript: Transcript,
    /// Pages that could not be downloaded.
    pub fetch_failures: Vec<FetchError>,
}

/// Wires the resolver, assembler and transcription adapter together.
pub struct ChapterPipeline {
    resolver: ChapterResolver,
    assembler: ChapterAssembler,
    adapter: TranscriptionAdapter,
    console: Console,
}

impl ChapterPipeline {
    /// Creates a new pipeline.
    pub fn new(
        resolver: ChapterResolver,
        assembler: ChapterAssembler,
        adapter: TranscriptionAdapter,
        console: Console,
    ) -> Self {
        Self {
            resolver,
            assembler,
            adapter,
            console,
        }
    }

    /// Runs the whole chapter.
    ///
    /// Fails only when the chapter cannot be resolved or its pages cannot be
    /// listed; in that case nothing is downloaded. Everything after that
    /// degrades page by page.
    pub async fn run(&self, query: &ChapterQuery) -> Result<ChapterRun, PipelineError> {
        self.console.step(&format!(
            "Resolving chapter {} of manga {}...",
            query.chapter_label, query.manga_id
        ));
        let chapter_id = self.resolver.resolve(query).await?;
        self.console
            .success(&format!("Chapter {} is {}", query.chapter_label, chapter_id));

        self.console.step("Fetching pages...");
        let chapter = self.assembler.assemble(&chapter_id).await?;
        if chapter.is_complete() {
            self.console.success(&format!(
                "Fetched all {} pages",
                self.console.count(chapter.page_count)
            ));
        } else {
            self.console.warning(&format!(
                "Fetched {} of {} pages",
                chapter.pages.len(),
                chapter.page_count
            ));
        }

        let output = self.adapter.transcribe(&chapter.pages, &self.console).await;
        let failed = chapter.failed_indices();
        let transcript = Transcript::assemble(chapter.page_count, output, &failed);

        Ok(ChapterRun {
            chapter_id,
            transcript,
            fetch_failures: chapter.failures,
        })
    }
}
