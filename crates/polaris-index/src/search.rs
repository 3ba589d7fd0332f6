use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use polaris_core::config::SearchSettings;
use polaris_core::error::{Error, Result};
use polaris_core::traits::Searcher;
use polaris_core::types::{HealthStatus, SearchFilters, SearchResult};
use polaris_text::normalizer::normalize;

use crate::index::{IndexState, LexicalIndex};
use crate::vectorizer::SparseVector;

/// Ranked cosine retrieval over a `LexicalIndex` snapshot.
pub struct SearchEngine {
    index: Arc<LexicalIndex>,
    settings: SearchSettings,
}

impl SearchEngine {
    pub fn new(index: Arc<LexicalIndex>, settings: SearchSettings) -> Self { Self { index, settings } }

    pub fn index(&self) -> &Arc<LexicalIndex> { &self.index }

    pub fn settings(&self) -> &SearchSettings { &self.settings }

    /// `0` means the configured default; anything above `max_limit` is clamped.
    pub fn effective_limit(&self, limit: usize) -> usize {
        let requested = if limit == 0 { self.settings.default_limit } else { limit };
        requested.min(self.settings.max_limit)
    }

    pub fn search(&self, query: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        let chars = query.chars().count();
        if chars > self.settings.max_query_chars {
            return Err(Error::Validation(format!("query is {} chars; limit is {}", chars, self.settings.max_query_chars)));
        }
        let terms = self.index.normalizer().terms(query);
        if terms.is_empty() {
            debug!("query has no searchable terms");
            return Ok(Vec::new());
        }
        let state = self.index.snapshot();
        let query_vector = match state.project(&terms) {
            Ok(v) => v,
            Err(Error::IndexUnavailable) => {
                debug!("search on an unfitted index");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        if query_vector.is_empty() { return Ok(Vec::new()); }

        let ranked = self.rank(&state, |row| query_vector.cosine(row), None);
        let query_terms: HashSet<String> = terms.into_iter().collect();
        let results: Vec<SearchResult> = ranked
            .into_iter()
            .filter(|&(i, _)| {
                let d = &state.documents[i].document;
                filters.matches(&d.category, &d.source)
            })
            .take(self.effective_limit(limit))
            .map(|(i, score)| {
                let doc = &state.documents[i].document;
                SearchResult {
                    document_id: doc.id.clone(),
                    title: doc.title.clone(),
                    snippet: truncate_chars(&doc.raw_text, self.settings.snippet_chars),
                    score,
                    source: doc.source.clone(),
                    category: doc.category.clone(),
                    highlights: self.highlights(&doc.raw_text, &query_terms),
                }
            })
            .collect();
        info!(query = %normalize(query), results = results.len(), "search");
        Ok(results)
    }

    /// Documents closest to `document_id`, never including itself. An unknown
    /// id yields no results.
    pub fn find_similar(&self, document_id: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let state = self.index.snapshot();
        let Some(target) = state.position(document_id) else {
            debug!(document_id, "similar: unknown document");
            return Ok(Vec::new());
        };
        let Some(target_row) = state.matrix.get(target) else { return Ok(Vec::new()) };
        let results = self
            .rank(&state, |row| target_row.cosine(row), Some(target))
            .into_iter()
            .take(self.effective_limit(limit))
            .map(|(i, score)| {
                let doc = &state.documents[i].document;
                SearchResult {
                    document_id: doc.id.clone(),
                    title: doc.title.clone(),
                    snippet: truncate_chars(&doc.raw_text, self.settings.similar_snippet_chars),
                    score,
                    source: doc.source.clone(),
                    category: doc.category.clone(),
                    highlights: Vec::new(),
                }
            })
            .collect::<Vec<_>>();
        debug!(document_id, results = results.len(), "similar");
        Ok(results)
    }

    pub fn health(&self) -> HealthStatus {
        let state = self.index.snapshot();
        if state.documents.is_empty() {
            HealthStatus::Warning
        } else if state.vocabulary.is_none() || state.matrix.len() != state.documents.len() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Scores at or above `min_score`, best first; equal scores keep index order.
    fn rank<F>(&self, state: &IndexState, score: F, exclude: Option<usize>) -> Vec<(usize, f32)>
    where
        F: Fn(&SparseVector) -> f32,
    {
        let mut scored: Vec<(usize, f32)> = state
            .matrix
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != exclude)
            .map(|(i, row)| (i, score(row)))
            .filter(|(_, s)| *s >= self.settings.min_score)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
    }

    /// Sentences of the original text that share a term with the query.
    fn highlights(&self, text: &str, query_terms: &HashSet<String>) -> Vec<String> {
        let normalizer = self.index.normalizer();
        text.split(['.', '!', '?', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter(|s| normalizer.terms(s).iter().any(|t| query_terms.contains(t)))
            .take(self.settings.max_highlights)
            .map(|s| truncate_chars(s, self.settings.highlight_chars))
            .collect()
    }
}

impl Searcher for SearchEngine {
    fn search(&self, query: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
        SearchEngine::search(self, query, filters, limit)
    }

    fn find_similar(&self, document_id: &str, limit: usize) -> Result<Vec<SearchResult>> {
        SearchEngine::find_similar(self, document_id, limit)
    }

    fn canonical_query(&self, query: &str) -> String { normalize(query) }

    fn health(&self) -> HealthStatus { SearchEngine::health(self) }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_counts_chars() {
        assert_eq!(truncate_chars("ação", 10), "ação");
        assert_eq!(truncate_chars("ação penal", 4), "ação...");
    }
}
