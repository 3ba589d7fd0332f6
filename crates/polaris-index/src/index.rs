//! The lexical index: one TF-IDF row per document over a global vocabulary.
//!
//! The vocabulary is global, so every add, update or remove re-fits it and
//! re-vectorizes the whole corpus. That costs O(N·V) per mutation and is meant
//! for corpora of hundreds to low thousands of documents, not more.
//!
//! Readers take a cheap `Arc` snapshot of the state and never hold the lock
//! while scoring. Writers are serialized by a gate, build the next state
//! off-lock and swap it in, so nobody ever observes a half-built index. A failed
//! fit leaves the previous state in place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use polaris_core::config::Settings;
use polaris_core::error::{Error, Result};
use polaris_core::traits::DocumentIndex;
use polaris_core::types::{Document, IndexStats, IngestReport};
use polaris_text::{Chunker, Normalizer};

use crate::storage;
use crate::vectorizer::{SparseVector, TfidfVectorizer, Vocabulary};

/// Chunk metadata kept per document; the chunk text itself is not stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub chunk_index: usize,
    pub structural_type: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub char_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub document: Document,
    pub normalized_text: String,
    pub content_hash: String,
    pub chunks: Vec<ChunkInfo>,
    pub indexed_at: DateTime<Utc>,
}

/// Row `i` of `matrix` belongs to `documents[i]`; every row's dimension is
/// `vocabulary.len()`.
#[derive(Debug, Clone, Default)]
pub struct IndexState {
    pub generation: u64,
    pub documents: Vec<IndexedDocument>,
    pub vocabulary: Option<Vocabulary>,
    pub matrix: Vec<SparseVector>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl IndexState {
    pub fn position(&self, document_id: &str) -> Option<usize> {
        self.documents.iter().position(|d| d.document.id == document_id)
    }

    /// Project analyzed query terms into the fitted space.
    pub fn project(&self, terms: &[String]) -> Result<SparseVector> {
        let vocabulary = self.vocabulary.as_ref().ok_or(Error::IndexUnavailable)?;
        Ok(vocabulary.transform(terms))
    }

    pub fn vocabulary_size(&self) -> usize { self.vocabulary.as_ref().map_or(0, Vocabulary::len) }
}

pub struct LexicalIndex {
    state: RwLock<Arc<IndexState>>,
    write_gate: Mutex<()>,
    normalizer: Normalizer,
    chunker: Chunker,
    vectorizer: TfidfVectorizer,
    index_dir: Option<PathBuf>,
    max_document_chars: usize,
}

impl LexicalIndex {
    /// Open the index persisted in `index_dir`. Missing, corrupt or inconsistent
    /// artifacts are logged and the index starts empty.
    pub fn open(settings: &Settings, index_dir: impl Into<PathBuf>) -> Result<Self> {
        let index_dir = index_dir.into();
        let index = Self::build(settings, Some(index_dir.clone()))?;
        match storage::load(&index_dir) {
            Ok(Some(snapshot)) => {
                let last_updated = snapshot.documents.iter().map(|d| d.indexed_at).max();
                info!(documents = snapshot.documents.len(), generation = snapshot.generation, dir = %index_dir.display(), "index loaded");
                *index.state.write() = Arc::new(IndexState {
                    generation: snapshot.generation,
                    documents: snapshot.documents,
                    vocabulary: snapshot.vocabulary,
                    matrix: snapshot.matrix,
                    last_updated,
                });
            }
            Ok(None) => info!(dir = %index_dir.display(), "no index on disk; starting empty"),
            Err(e) => warn!(error = %e, dir = %index_dir.display(), "index artifacts unusable; starting empty"),
        }
        Ok(index)
    }

    /// An index that is never written to disk.
    pub fn in_memory(settings: &Settings) -> Result<Self> { Self::build(settings, None) }

    fn build(settings: &Settings, index_dir: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            state: RwLock::new(Arc::new(IndexState::default())),
            write_gate: Mutex::new(()),
            normalizer: Normalizer::new(&settings.normalizer)?,
            chunker: Chunker::new(&settings.chunking)?,
            vectorizer: TfidfVectorizer::from_settings(&settings.index),
            index_dir,
            max_document_chars: settings.index.max_document_chars,
        })
    }

    pub fn normalizer(&self) -> &Normalizer { &self.normalizer }

    pub fn index_dir(&self) -> Option<&Path> { self.index_dir.as_deref() }

    /// Consistent view of the current state.
    pub fn snapshot(&self) -> Arc<IndexState> { Arc::clone(&self.state.read()) }

    pub fn document(&self, document_id: &str) -> Option<Document> {
        let state = self.snapshot();
        state.position(document_id).map(|i| state.documents[i].document.clone())
    }

    pub fn len(&self) -> usize { self.snapshot().documents.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// The query as a vector in the current feature space.
    pub fn query_vector(&self, text: &str) -> Result<SparseVector> {
        self.snapshot().project(&self.normalizer.terms(text))
    }

    /// Write the current state to the index directory.
    pub fn save(&self) -> Result<()> {
        let Some(dir) = &self.index_dir else { return Ok(()) };
        let _gate = self.write_gate.lock();
        let state = self.snapshot();
        storage::save(dir, state.generation, state.vocabulary.as_ref(), &state.matrix, &state.documents)
    }

    fn validate(&self, doc: &Document) -> Result<()> {
        if doc.id.trim().is_empty() { return Err(Error::Validation("document id is empty".into())); }
        if doc.raw_text.trim().is_empty() {
            return Err(Error::Validation(format!("document {} has no text", doc.id)));
        }
        let chars = doc.raw_text.chars().count();
        if chars > self.max_document_chars {
            return Err(Error::Validation(format!("document {} is {} chars; limit is {}", doc.id, chars, self.max_document_chars)));
        }
        Ok(())
    }

    fn prepare(&self, doc: Document, content_hash: String) -> IndexedDocument {
        let chunks = self
            .chunker
            .chunk_document(&doc)
            .into_iter()
            .map(|c| ChunkInfo {
                chunk_index: c.chunk_index,
                structural_type: c.structural_type,
                start_offset: c.start_offset,
                end_offset: c.end_offset,
                char_count: c.char_count,
            })
            .collect();
        let normalized_text = self.normalizer.normalize(&format!("{}\n{}", doc.title, doc.raw_text));
        IndexedDocument { document: doc, normalized_text, content_hash, chunks, indexed_at: Utc::now() }
    }

    fn upsert(&self, doc: Document, must_exist: bool) -> Result<bool> {
        self.validate(&doc)?;
        let _gate = self.write_gate.lock();
        let current = self.snapshot();
        let hash = content_hash(&doc);
        let mut documents = current.documents.clone();
        match current.position(&doc.id) {
            Some(i) if documents[i].content_hash == hash => {
                debug!(document_id = %doc.id, "content unchanged; skipping rebuild");
                return Ok(true);
            }
            Some(i) => documents[i] = self.prepare(doc, hash),
            None if must_exist => {
                debug!(document_id = %doc.id, "update of unknown document");
                return Ok(false);
            }
            None => documents.push(self.prepare(doc, hash)),
        }
        Ok(self.refit(documents, current.generation))
    }

    /// Fit and install a new state. Returns false, leaving the current state
    /// untouched, when the corpus cannot be vectorized.
    fn refit(&self, documents: Vec<IndexedDocument>, previous_generation: u64) -> bool {
        let count = documents.len();
        match self.fit(documents, previous_generation + 1) {
            Ok(state) => {
                info!(documents = count, vocabulary = state.vocabulary_size(), generation = state.generation, "index rebuilt");
                let state = Arc::new(state);
                *self.state.write() = Arc::clone(&state);
                self.persist(&state);
                true
            }
            Err(e) => {
                warn!(error = %e, documents = count, "index rebuild failed; keeping previous state");
                false
            }
        }
    }

    fn fit(&self, documents: Vec<IndexedDocument>, generation: u64) -> Result<IndexState> {
        if documents.is_empty() {
            return Ok(IndexState { generation, last_updated: Some(Utc::now()), ..Default::default() });
        }
        let corpus: Vec<Vec<String>> = documents.iter().map(|d| self.normalizer.terms(&d.normalized_text)).collect();
        let (vocabulary, matrix) = self.vectorizer.fit_transform(&corpus)?;
        Ok(IndexState { generation, documents, vocabulary: Some(vocabulary), matrix, last_updated: Some(Utc::now()) })
    }

    fn persist(&self, state: &IndexState) {
        let Some(dir) = &self.index_dir else { return };
        match storage::save(dir, state.generation, state.vocabulary.as_ref(), &state.matrix, &state.documents) {
            Ok(()) => debug!(generation = state.generation, "index saved"),
            Err(e) => warn!(error = %e, dir = %dir.display(), "index save failed; previous artifacts left in place"),
        }
    }
}

impl DocumentIndex for LexicalIndex {
    /// Index a new document, or replace one with the same id.
    fn add(&self, doc: Document) -> Result<bool> { self.upsert(doc, false) }

    /// Replace an indexed document; `false` if the id is unknown.
    fn update(&self, doc: Document) -> Result<bool> { self.upsert(doc, true) }

    fn add_batch(&self, docs: Vec<Document>) -> IngestReport {
        let _gate = self.write_gate.lock();
        let current = self.snapshot();
        let mut documents = current.documents.clone();
        let mut report = IngestReport::default();
        let mut changed = false;
        for doc in docs {
            if let Err(e) = self.validate(&doc) {
                report.failed.push(format!("{}: {}", doc.id, e));
                continue;
            }
            let hash = content_hash(&doc);
            let prepared = match documents.iter().position(|d| d.document.id == doc.id) {
                Some(i) if documents[i].content_hash == hash => {
                    report.processed_documents += 1;
                    report.total_chunks += documents[i].chunks.len();
                    continue;
                }
                Some(i) => {
                    documents[i] = self.prepare(doc, hash);
                    &documents[i]
                }
                None => {
                    documents.push(self.prepare(doc, hash));
                    &documents[documents.len() - 1]
                }
            };
            report.processed_documents += 1;
            report.total_chunks += prepared.chunks.len();
            changed = true;
        }
        report.success = if changed { self.refit(documents, current.generation) } else { report.processed_documents > 0 };
        if !report.success {
            report.processed_documents = 0;
            report.total_chunks = 0;
        }
        info!(processed = report.processed_documents, failed = report.failed.len(), success = report.success, "batch indexed");
        report
    }

    fn remove(&self, document_id: &str) -> Result<bool> {
        let _gate = self.write_gate.lock();
        let current = self.snapshot();
        let Some(i) = current.position(document_id) else { return Ok(false) };
        let mut documents = current.documents.clone();
        documents.remove(i);
        Ok(self.refit(documents, current.generation))
    }

    fn rebuild(&self) -> bool {
        let _gate = self.write_gate.lock();
        let current = self.snapshot();
        if current.documents.is_empty() {
            warn!("rebuild requested on an empty corpus");
            return false;
        }
        self.refit(current.documents.clone(), current.generation)
    }

    fn contains(&self, document_id: &str) -> bool { self.snapshot().position(document_id).is_some() }

    fn stats(&self) -> IndexStats {
        let state = self.snapshot();
        let mut categories = BTreeMap::new();
        let mut sources = BTreeMap::new();
        for d in &state.documents {
            *categories.entry(d.document.category.clone()).or_insert(0) += 1;
            *sources.entry(d.document.source.clone()).or_insert(0) += 1;
        }
        IndexStats {
            documents: state.documents.len(),
            chunks: state.documents.iter().map(|d| d.chunks.len()).sum(),
            vocabulary_size: state.vocabulary_size(),
            categories,
            sources,
            index_bytes: self.index_dir.as_deref().map_or(0, storage::disk_usage),
            last_updated: state.last_updated,
        }
    }
}

/// Hash of everything that affects a document's row or its filters.
fn content_hash(doc: &Document) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [&doc.title, &doc.raw_text, &doc.category, &doc.source] {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}
