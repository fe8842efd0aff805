//! Mangascribe - manga chapter downloader and transcriber.
//!
//! This library provides functionality for:
//! - Resolving a MangaDex manga id and chapter label into a chapter id
//! - Downloading every page of the chapter with bounded, paced concurrency
//! - Transcribing the pages with a vision model, per chapter or per page
//! - Assembling the results into one page-ordered transcript

pub mod assembler;
pub mod config;
pub mod console;
pub mod error;
pub mod fetcher;
pub mod mangadex;
pub mod pipeline;
pub mod transcript;
pub mod transcription;
pub mod utils;

// Re-export commonly used types
pub use assembler::{AssembledChapter, ChapterAssembler};
pub use config::{Config, ResolveStrategy, TranscriptionMode};
pub use console::Console;
pub use error::{
    ApiError, ConfigError, FetchError, FetchFailure, PipelineError, ResolveError,
    TranscriptionError,
};
pub use fetcher::{HttpImageFetcher, ImageFetcher, PageImage};
pub use mangadex::{ChapterId, ChapterQuery, ChapterResolver, MangaDexClient, PageLocator, PageRef};
pub use pipeline::{ChapterPipeline, ChapterRun};
pub use transcript::{PageResult, PageStatus, Transcript};
pub use transcription::{
    AdapterOutput, ChapterModel, CharacterBank, CharacterRef, PageOcr, PageTranscription,
    TranscriptionAdapter, VisionModel,
};
