//! Resolution of a (manga, chapter label) pair into a chapter id.

use super::{ChapterData, MangaDexClient};
use crate::config::ResolveStrategy;
use crate::error::ResolveError;
use std::fmt;

/// What the user asked for: one chapter of one manga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterQuery {
    /// MangaDex manga UUID.
    pub manga_id: String,
    /// Chapter label as the API spells it ("12", "12.5", ...).
    pub chapter_label: String,
}

impl ChapterQuery {
    /// Creates a new query.
    pub fn new(manga_id: impl Into<String>, chapter_label: impl Into<String>) -> Self {
        Self {
            manga_id: manga_id.into(),
            chapter_label: chapter_label.into(),
        }
    }
}

/// Opaque chapter handle returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChapterId(String);

impl ChapterId {
    /// Wraps a raw chapter id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps chapter labels to chapter ids using one fixed strategy.
pub struct ChapterResolver {
    client: MangaDexClient,
    strategy: ResolveStrategy,
}

impl ChapterResolver {
    /// Creates a resolver that always uses `strategy`.
    pub fn new(client: MangaDexClient, strategy: ResolveStrategy) -> Self {
        Self { client, strategy }
    }

    /// Returns the strategy this resolver uses.
    pub fn strategy(&self) -> ResolveStrategy {
        self.strategy
    }

    /// Resolves the query to a single chapter id.
    pub async fn resolve(&self, query: &ChapterQuery) -> Result<ChapterId, ResolveError> {
        match self.strategy {
            ResolveStrategy::Feed => self.resolve_from_feed(query).await,
            ResolveStrategy::Query => self.resolve_from_query(query).await,
        }
    }

    async fn resolve_from_feed(&self, query: &ChapterQuery) -> Result<ChapterId, ResolveError> {
        let feed = self.client.chapter_feed(&query.manga_id).await?;

        match find_label(&feed, &query.chapter_label) {
            Some(chapter) => Ok(ChapterId::new(chapter.id.clone())),
            None => Err(not_found(query, available_labels(&feed))),
        }
    }

    async fn resolve_from_query(&self, query: &ChapterQuery) -> Result<ChapterId, ResolveError> {
        let results = self
            .client
            .query_chapters(&query.manga_id, &query.chapter_label)
            .await?;

        // The filter is not always honored, so check the label ourselves.
        let matching: Vec<&ChapterData> = results
            .iter()
            .filter(|c| c.attributes.chapter.as_deref() == Some(query.chapter_label.as_str()))
            .collect();

        if let Some(first) = matching.first() {
            if matching.len() > 1 {
                self.client.console.warning(&format!(
                    "Chapter '{}' has {} uploads, using {}",
                    query.chapter_label,
                    matching.len(),
                    first.id
                ));
            }
            return Ok(ChapterId::new(first.id.clone()));
        }

        // Nothing matched; list the feed so the user can see what exists.
        let available = match self.client.chapter_feed(&query.manga_id).await {
            Ok(feed) => available_labels(&feed),
            Err(e) => {
                self.client
                    .console
                    .debug(&format!("Could not list available chapters: {}", e));
                Vec::new()
            }
        };

        Err(not_found(query, available))
    }
}

fn find_label<'a>(chapters: &'a [ChapterData], label: &str) -> Option<&'a ChapterData> {
    chapters
        .iter()
        .find(|c| c.attributes.chapter.as_deref() == Some(label))
}

/// Distinct chapter labels in feed order, skipping unlabeled oneshots.
fn available_labels(chapters: &[ChapterData]) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for label in chapters.iter().filter_map(|c| c.attributes.chapter.as_ref()) {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
    labels
}

fn not_found(query: &ChapterQuery, available: Vec<String>) -> ResolveError {
    ResolveError::NotFound {
        manga_id: query.manga_id.clone(),
        label: query.chapter_label.clone(),
        available,
    }
}
