use crate::error::Result;
use crate::types::{Document, HealthStatus, IndexStats, IngestReport, SearchFilters, SearchResult};

/// Write path: every mutation re-fits the global vocabulary.
pub trait DocumentIndex: Send + Sync {
    fn add(&self, doc: Document) -> Result<bool>;
    fn update(&self, doc: Document) -> Result<bool>;
    /// Upsert many documents with one refit; invalid ones are reported, not fatal.
    fn add_batch(&self, docs: Vec<Document>) -> IngestReport;
    fn remove(&self, document_id: &str) -> Result<bool>;
    fn rebuild(&self) -> bool;
    fn contains(&self, document_id: &str) -> bool;
    fn stats(&self) -> IndexStats;
}

/// Read path over a fitted index.
pub trait Searcher: Send + Sync {
    fn search(&self, query: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>>;
    fn find_similar(&self, document_id: &str, limit: usize) -> Result<Vec<SearchResult>>;
    /// The query exactly as the index will see it; stable across calls.
    fn canonical_query(&self, query: &str) -> String;
    fn health(&self) -> HealthStatus;
}
