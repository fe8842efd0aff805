//! Assembly of per-page transcription results into one ordered transcript.
//!
//! The transcript always has exactly one entry per declared page, whatever
//! happened to the page on the way: fetch failures, model failures and pages
//! the model simply skipped all show up as empty entries in their place.

use crate::transcription::{AdapterOutput, PageTranscription};
use serde::Serialize;
use std::fmt::Write as _;

/// Why a page ended up with the lines it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// The model returned text for this page (possibly no lines).
    Transcribed,
    /// The page image could not be retrieved, so it was never transcribed.
    FetchFailed,
    /// The model call covering this page failed.
    TranscriptionFailed,
    /// The model answered but said nothing about this page.
    NoText,
}

/// Transcript lines for a single page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageResult {
    /// Zero-based page index.
    pub index: usize,
    /// Lines in reading order. Empty unless the status is `Transcribed`.
    pub lines: Vec<String>,
    /// How the lines were obtained.
    pub status: PageStatus,
}

impl PageResult {
    fn empty(index: usize, status: PageStatus) -> Self {
        Self {
            index,
            lines: Vec::new(),
            status,
        }
    }

    /// Returns the printed header, e.g. `--- Page 1 ---` for index 0.
    pub fn header(&self) -> String {
        format!("--- Page {} ---", self.index + 1)
    }

    /// Returns true if this page is a gap rather than real output.
    pub fn is_gap(&self) -> bool {
        !matches!(self.status, PageStatus::Transcribed)
    }
}

/// Ordered transcript of a whole chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transcript {
    pages: Vec<PageResult>,
}

impl Transcript {
    /// Merges adapter output back into page order.
    ///
    /// `fetch_failures` lists pages that never reached the adapter. Records for
    /// indices outside `0..page_count` are dropped, and the first record wins
    /// when an index is reported twice.
    pub fn assemble(page_count: usize, output: AdapterOutput, fetch_failures: &[usize]) -> Self {
        let mut slots: Vec<Option<PageResult>> = vec![None; page_count];

        for &index in fetch_failures {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(PageResult::empty(index, PageStatus::FetchFailed));
            }
        }

        for PageTranscription { index, lines } in output.records {
            if let Some(slot) = slots.get_mut(index)
                && slot.is_none()
            {
                *slot = Some(PageResult {
                    index,
                    lines,
                    status: PageStatus::Transcribed,
                });
            }
        }

        for index in output.failed_pages {
            if let Some(slot) = slots.get_mut(index)
                && slot.is_none()
            {
                *slot = Some(PageResult::empty(index, PageStatus::TranscriptionFailed));
            }
        }

        let pages = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.unwrap_or_else(|| PageResult::empty(index, PageStatus::NoText)))
            .collect();

        Self { pages }
    }

    /// Returns all pages in ascending index order.
    pub fn pages(&self) -> &[PageResult] {
        &self.pages
    }

    /// Returns the number of pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns true if the chapter had no pages.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Returns the indices of pages with no real output.
    pub fn gaps(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| p.is_gap())
            .map(|p| p.index)
            .collect()
    }

    /// Renders the transcript as plain text with a header per page.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for page in &self.pages {
            let _ = writeln!(out, "{}", page.header());
            for line in &page.lines {
                let _ = writeln!(out, "{}", line);
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, lines: &[&str]) -> PageTranscription {
        PageTranscription {
            index,
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn test_missing_index_becomes_empty_entry() {
        let output = AdapterOutput {
            records: vec![
                record(0, &["a"]),
                record(1, &["b"]),
                record(3, &["d"]),
                record(4, &["e"]),
            ],
            failed_pages: Vec::new(),
        };

        let transcript = Transcript::assemble(5, output, &[]);
        assert_eq!(transcript.len(), 5);
        assert!(transcript.pages()[2].lines.is_empty());
        assert_eq!(transcript.pages()[2].status, PageStatus::NoText);
        assert_eq!(transcript.gaps(), vec![2]);
    }

    #[test]
    fn test_order_is_by_index_not_arrival() {
        let output = AdapterOutput {
            records: vec![record(2, &["c"]), record(0, &["a"]), record(1, &["b"])],
            failed_pages: Vec::new(),
        };

        let transcript = Transcript::assemble(3, output, &[]);
        let indices: Vec<usize> = transcript.pages().iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(transcript.pages()[0].lines, vec!["a"]);
        assert_eq!(transcript.pages()[2].lines, vec!["c"]);
    }

    #[test]
    fn test_statuses_are_kept_apart() {
        let output = AdapterOutput {
            records: vec![record(0, &[])],
            failed_pages: vec![2],
        };

        let transcript = Transcript::assemble(4, output, &[1]);
        let statuses: Vec<PageStatus> = transcript.pages().iter().map(|p| p.status).collect();
        assert_eq!(
            statuses,
            vec![
                PageStatus::Transcribed,
                PageStatus::FetchFailed,
                PageStatus::TranscriptionFailed,
                PageStatus::NoText,
            ]
        );
        assert!(transcript.pages().iter().all(|p| p.lines.is_empty()));
    }

    #[test]
    fn test_out_of_range_and_duplicate_records_ignored() {
        let output = AdapterOutput {
            records: vec![record(0, &["first"]), record(0, &["second"]), record(9, &["x"])],
            failed_pages: vec![7],
        };

        let transcript = Transcript::assemble(2, output, &[]);
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.pages()[0].lines, vec!["first"]);
    }

    #[test]
    fn test_fetch_failure_wins_over_stray_record() {
        let output = AdapterOutput {
            records: vec![record(1, &["should not appear"])],
            failed_pages: Vec::new(),
        };

        let transcript = Transcript::assemble(2, output, &[1]);
        assert_eq!(transcript.pages()[1].status, PageStatus::FetchFailed);
        assert!(transcript.pages()[1].lines.is_empty());
    }

    #[test]
    fn test_render_headers() {
        let output = AdapterOutput {
            records: vec![record(0, &["Hello", "World"]), record(2, &["Bye"])],
            failed_pages: Vec::new(),
        };

        let rendered = Transcript::assemble(3, output, &[1]).render();
        assert_eq!(
            rendered,
            "--- Page 1 ---\nHello\nWorld\n\n--- Page 2 ---\n\n--- Page 3 ---\nBye\n\n"
        );
    }

    #[test]
    fn test_zero_pages() {
        let transcript = Transcript::assemble(0, AdapterOutput::default(), &[]);
        assert!(transcript.is_empty());
        assert_eq!(transcript.render(), "");
    }
}
