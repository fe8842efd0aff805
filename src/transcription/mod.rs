//! Transcription adapter boundary.
//!
//! The pipeline does not know how text is read off a page. It drives one of
//! two capability shapes: a model that takes the whole chapter at once
//! (optionally with a bank of named character references), or an OCR-style
//! capability that reads one page per call. Both end up as the same
//! [`AdapterOutput`].

mod vision;

pub use vision::VisionModel;

use crate::config::TranscriptionMode;
use crate::console::Console;
use crate::error::TranscriptionError;
use crate::fetcher::PageImage;
use async_trait::async_trait;
use image::RgbImage;
use std::path::Path;

/// File extensions accepted as character reference images.
const REFERENCE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Text lines the adapter produced for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTranscription {
    /// Zero-based page index.
    pub index: usize,
    /// Lines in reading order.
    pub lines: Vec<String>,
}

/// Everything the adapter reported for a chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterOutput {
    /// Pages the capability returned text for.
    pub records: Vec<PageTranscription>,
    /// Pages whose model call failed.
    pub failed_pages: Vec<usize>,
}

/// A named reference image of a character.
#[derive(Debug, Clone)]
pub struct CharacterRef {
    /// Name the model should use for this character.
    pub name: String,
    /// Reference picture of the character.
    pub image: RgbImage,
}

/// Named character references handed to whole-chapter models as-is.
#[derive(Debug, Clone, Default)]
pub struct CharacterBank {
    entries: Vec<CharacterRef>,
}

impl CharacterBank {
    /// Creates a bank from explicit entries.
    pub fn new(entries: Vec<CharacterRef>) -> Self {
        Self { entries }
    }

    /// Loads every reference image in `dir`, naming each after its file stem.
    pub fn load_dir(dir: &Path) -> Result<Self, TranscriptionError> {
        let read_dir = std::fs::read_dir(dir)
            .map_err(|e| TranscriptionError::CharacterBank(format!("{}: {}", dir.display(), e)))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let path = entry
                .map_err(|e| TranscriptionError::CharacterBank(e.to_string()))?
                .path();

            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| REFERENCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !path.is_file() || !is_image {
                continue;
            }

            let image = image::open(&path).map_err(|e| {
                TranscriptionError::CharacterBank(format!("{}: {}", path.display(), e))
            })?;
            entries.push(CharacterRef {
                name: name.to_string(),
                image: image.to_rgb8(),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { entries })
    }

    /// References in name order.
    pub fn entries(&self) -> &[CharacterRef] {
        &self.entries
    }

    /// Number of references.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the bank holds no references.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A capability that transcribes a whole chapter in one call.
#[async_trait]
pub trait ChapterModel: Send + Sync {
    /// Human-readable name for log output.
    fn name(&self) -> &'static str;

    /// Returns lines for the pages it found text on.
    async fn predict(
        &self,
        pages: &[PageImage],
        bank: &CharacterBank,
    ) -> Result<Vec<PageTranscription>, TranscriptionError>;
}

/// A capability that transcribes one page image per call.
#[async_trait]
pub trait PageOcr: Send + Sync {
    /// Human-readable name for log output.
    fn name(&self) -> &'static str;

    /// Returns the lines on the page in reading order.
    async fn transcribe(&self, page: &PageImage) -> Result<Vec<String>, TranscriptionError>;
}

/// The configured transcription capability.
pub enum TranscriptionAdapter {
    /// One call for all pages.
    WholeChapter {
        model: Box<dyn ChapterModel>,
        bank: CharacterBank,
    },
    /// One call per page.
    PerPage(Box<dyn PageOcr>),
}

impl TranscriptionAdapter {
    /// Wraps a vision model in the variant selected by `mode`.
    ///
    /// The character bank only applies to whole-chapter transcription.
    pub fn from_mode(mode: TranscriptionMode, model: VisionModel, bank: CharacterBank) -> Self {
        match mode {
            TranscriptionMode::WholeChapter => TranscriptionAdapter::WholeChapter {
                model: Box::new(model),
                bank,
            },
            TranscriptionMode::PerPage => TranscriptionAdapter::PerPage(Box::new(model)),
        }
    }

    /// Returns the mode this adapter runs in.
    pub fn mode(&self) -> TranscriptionMode {
        match self {
            TranscriptionAdapter::WholeChapter { .. } => TranscriptionMode::WholeChapter,
            TranscriptionAdapter::PerPage(_) => TranscriptionMode::PerPage,
        }
    }

    /// Transcribes the fetched pages.
    ///
    /// Never fails: a failed call marks the pages it covered as failed.
    pub async fn transcribe(&self, pages: &[PageImage], console: &Console) -> AdapterOutput {
        if pages.is_empty() {
            return AdapterOutput::default();
        }

        match self {
            TranscriptionAdapter::WholeChapter { model, bank } => {
                console.step(&format!(
                    "Transcribing {} pages with {} ({} reference characters)...",
                    pages.len(),
                    model.name(),
                    bank.len()
                ));
                match model.predict(pages, bank).await {
                    Ok(records) => AdapterOutput {
                        records,
                        failed_pages: Vec::new(),
                    },
                    Err(e) => {
                        console.error(&format!("Chapter transcription failed: {}", e));
                        AdapterOutput {
                            records: Vec::new(),
                            failed_pages: pages.iter().map(|p| p.index).collect(),
                        }
                    }
                }
            }
            TranscriptionAdapter::PerPage(ocr) => {
                console.step(&format!(
                    "Transcribing {} pages one at a time with {}...",
                    pages.len(),
                    ocr.name()
                ));
                let mut output = AdapterOutput::default();
                for page in pages {
                    match ocr.transcribe(page).await {
                        Ok(lines) => {
                            console.progress_update(&format!(
                                "Page {} transcribed ({} lines)",
                                page.index + 1,
                                lines.len()
                            ));
                            output.records.push(PageTranscription {
                                index: page.index,
                                lines,
                            });
                        }
                        Err(e) => {
                            console.progress_done();
                            console.warning(&format!(
                                "Page {} transcription failed: {}",
                                page.index + 1,
                                e
                            ));
                            output.failed_pages.push(page.index);
                        }
                    }
                }
                console.progress_done();
                output
            }
        }
    }
}
