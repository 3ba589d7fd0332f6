//! Domain types shared by the chunker, the lexical index, the search engine
//! and the service facade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type DocumentId = String;
pub type Meta = BTreeMap<String, String>;

/// A caller-owned document. The core only ever reads a copy of it.
///
/// - `id`: opaque, stable identity assigned by the caller
/// - `raw_text`: the extracted text, untouched by normalization
/// - `source`/`category`: flat labels used by search filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub raw_text: String,
    pub source: String,
    pub category: String,
    #[serde(default)]
    pub metadata: Meta,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            raw_text: raw_text.into(),
            source: "unknown".to_string(),
            category: "general".to_string(),
            metadata: Meta::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self { self.source = source.into(); self }

    pub fn with_category(mut self, category: impl Into<String>) -> Self { self.category = category.into(); self }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A bounded, possibly overlapping excerpt of a document.
///
/// `text` carries the overlap borrowed from its neighbours: the first
/// `overlap_before` chars come from the previous chunk and the last
/// `overlap_after` chars from the next one. `start_offset..end_offset` is the
/// byte range of the core (non-overlap) region in the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: DocumentId,
    pub chunk_index: usize,
    pub text: String,
    pub char_count: usize,
    pub structural_type: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub overlap_before: usize,
    pub overlap_after: usize,
}

impl Chunk {
    /// The chunk text without the context borrowed from neighbouring chunks.
    pub fn core(&self) -> &str {
        let start = byte_index_of_char(&self.text, self.overlap_before);
        let keep = self.char_count.saturating_sub(self.overlap_after);
        let end = byte_index_of_char(&self.text, keep);
        &self.text[start..end.max(start)]
    }
}

fn byte_index_of_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}

/// Optional post-scoring filters. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchFilters {
    pub category: Option<String>,
    pub source: Option<String>,
}

impl SearchFilters {
    pub fn category(category: impl Into<String>) -> Self { Self { category: Some(category.into()), source: None } }

    pub fn source(source: impl Into<String>) -> Self { Self { category: None, source: Some(source.into()) } }

    pub fn matches(&self, category: &str, source: &str) -> bool {
        self.category.as_deref().map_or(true, |c| c == category)
            && self.source.as_deref().map_or(true, |s| s == source)
    }
}

/// One ranked hit. Transient: computed per query, never persisted
/// (the service may cache it for a short TTL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub document_id: DocumentId,
    pub title: String,
    pub snippet: String,
    pub score: f32,
    pub source: String,
    pub category: String,
    pub highlights: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub documents: usize,
    pub chunks: usize,
    pub vocabulary_size: usize,
    pub categories: BTreeMap<String, usize>,
    pub sources: BTreeMap<String, usize>,
    pub index_bytes: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
    Unhealthy,
}

/// Outcome of indexing a batch of documents with a single refit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub success: bool,
    pub processed_documents: usize,
    pub total_chunks: usize,
    /// `"<id>: <reason>"` for every document left out of the batch.
    pub failed: Vec<String>,
}

/// Outcome of a full index rebuild as reported to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub success: bool,
    pub documents_indexed: usize,
}
