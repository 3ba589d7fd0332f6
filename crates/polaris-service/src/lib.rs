//! polaris-service
//!
//! `SearchService` is the one context object collaborators hold: it owns the
//! index, the search engine and the cache, is built once at startup and passed
//! to whatever serves requests. Reads are cached; every successful mutation
//! drops the cached reads.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use polaris_cache::Cache;
use polaris_core::config::{resolve_with_base, Settings};
use polaris_core::error::Result;
use polaris_core::traits::{DocumentIndex, Searcher};
use polaris_core::types::{
    Document, HealthStatus, IndexStats, IngestReport, RebuildReport, SearchFilters, SearchResult,
};
use polaris_index::{LexicalIndex, SearchEngine};

const SEARCH_PREFIX: &str = "search:";
const SIMILAR_PREFIX: &str = "similar:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub overall: HealthStatus,
    pub search: HealthStatus,
    pub cache: HealthStatus,
}

pub struct SearchService {
    index: Arc<LexicalIndex>,
    engine: SearchEngine,
    cache: Arc<Cache>,
    result_ttl: Duration,
}

impl SearchService {
    pub fn new(index: Arc<LexicalIndex>, settings: &Settings, cache: Arc<Cache>) -> Self {
        let engine = SearchEngine::new(Arc::clone(&index), settings.search.clone());
        Self { index, engine, cache, result_ttl: Duration::from_secs(settings.cache.result_ttl_secs) }
    }

    /// Open the persisted index (relative `data.index_dir` resolved against
    /// `base_dir`) and connect the cache.
    pub fn from_settings(settings: &Settings, base_dir: &Path) -> Result<Self> {
        let index_dir = resolve_with_base(base_dir, &settings.data.index_dir);
        let index = Arc::new(LexicalIndex::open(settings, index_dir)?);
        let cache = Arc::new(Cache::from_settings(&settings.cache)?);
        Ok(Self::new(index, settings, cache))
    }

    pub fn index(&self) -> &Arc<LexicalIndex> { &self.index }

    pub fn cache(&self) -> &Arc<Cache> { &self.cache }

    pub fn index_document(&self, doc: Document) -> Result<bool> {
        let id = doc.id.clone();
        let indexed = self.index.add(doc)?;
        if indexed { self.invalidate_reads(); } else { warn!(document_id = %id, "document not indexed"); }
        Ok(indexed)
    }

    /// Index many documents with a single refit.
    pub fn index_documents(&self, docs: Vec<Document>) -> IngestReport {
        let report = self.index.add_batch(docs);
        if report.success { self.invalidate_reads(); }
        report
    }

    pub fn remove_document(&self, document_id: &str) -> Result<bool> {
        let removed = self.index.remove(document_id)?;
        if removed { self.invalidate_reads(); }
        Ok(removed)
    }

    pub fn search(&self, query: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        let key = self.search_key(query, filters, limit);
        if let Some(hit) = self.cache.get::<Vec<SearchResult>>(&key) {
            debug!(key = %key, "search served from cache");
            return Ok(hit);
        }
        let results = self.engine.search(query, filters, limit)?;
        self.cache.set(&key, &results, Some(self.result_ttl));
        Ok(results)
    }

    pub fn find_similar(&self, document_id: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let key = format!(
            "{}{}:{}:{}",
            SIMILAR_PREFIX,
            document_id,
            self.engine.effective_limit(limit),
            self.index.snapshot().generation
        );
        if let Some(hit) = self.cache.get::<Vec<SearchResult>>(&key) { return Ok(hit); }
        let results = self.engine.find_similar(document_id, limit)?;
        self.cache.set(&key, &results, Some(self.result_ttl));
        Ok(results)
    }

    pub fn rebuild_index(&self) -> RebuildReport {
        let success = self.index.rebuild();
        if success { self.invalidate_reads(); }
        let documents_indexed = if success { self.index.len() } else { 0 };
        info!(success, documents_indexed, "rebuild requested");
        RebuildReport { success, documents_indexed }
    }

    pub fn stats(&self) -> IndexStats { self.index.stats() }

    pub fn health(&self) -> ServiceHealth {
        let search = self.engine.health();
        let cache = self.cache.health();
        ServiceHealth { overall: worst(search, cache), search, cache }
    }

    /// Write the index to disk. Mutations already persist; this is for callers
    /// that want an explicit checkpoint.
    pub fn save(&self) -> Result<()> { self.index.save() }

    /// Periodically purge expired local cache entries. Needs a tokio runtime.
    pub fn start_expiry_sweeper(&self, every: Duration) -> Result<JoinHandle<()>> {
        polaris_cache::spawn_expiry_sweeper(Arc::clone(&self.cache), every)
    }

    /// Cache key for a query: stable across spellings that normalize alike
    /// and across `limit` values that clamp to the same bound. The index
    /// generation is part of the key, so a result computed before a mutation
    /// is never served after it.
    pub fn search_key(&self, query: &str, filters: &SearchFilters, limit: usize) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.index.snapshot().generation.to_le_bytes());
        hasher.update(self.engine.canonical_query(query).as_bytes());
        for part in [filters.category.as_deref(), filters.source.as_deref()] {
            hasher.update(&[0x1f]);
            hasher.update(part.unwrap_or("\u{0}").as_bytes());
        }
        hasher.update(&self.engine.effective_limit(limit).to_le_bytes());
        format!("{}{}", SEARCH_PREFIX, hasher.finalize().to_hex())
    }

    fn invalidate_reads(&self) {
        self.cache.clear(Some(&format!("{}*", SEARCH_PREFIX)));
        self.cache.clear(Some(&format!("{}*", SIMILAR_PREFIX)));
    }
}

fn severity(s: HealthStatus) -> u8 {
    match s {
        HealthStatus::Healthy => 0,
        HealthStatus::Warning => 1,
        HealthStatus::Degraded => 2,
        HealthStatus::Unhealthy => 3,
    }
}

fn worst(a: HealthStatus, b: HealthStatus) -> HealthStatus { if severity(a) >= severity(b) { a } else { b } }
