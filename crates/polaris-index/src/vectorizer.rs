//! TF-IDF vectorizer over analyzed terms.
//!
//! Features are word n-grams (1..=`ngram_max`). Weighting is raw count times the
//! smoothed idf `ln((1 + n) / (1 + df)) + 1`, and every row is L2-normalised, so
//! cosine similarity reduces to a sparse dot product.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use polaris_core::config::IndexSettings;
use polaris_core::error::{Error, Result};

/// Sparse row: strictly increasing `indices` into the vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    fn from_weights(mut weights: Vec<(u32, f32)>) -> Self {
        weights.sort_unstable_by_key(|(i, _)| *i);
        let norm = weights.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
        let (indices, values) = weights
            .into_iter()
            .map(|(i, w)| (i, if norm > 0.0 { w / norm } else { w }))
            .unzip();
        Self { indices, values }
    }

    pub fn is_empty(&self) -> bool { self.indices.is_empty() }

    pub fn nnz(&self) -> usize { self.indices.len() }

    pub fn norm(&self) -> f32 { self.values.iter().map(|v| v * v).sum::<f32>().sqrt() }

    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (mut a, mut b, mut sum) = (0, 0, 0.0f32);
        while a < self.indices.len() && b < other.indices.len() {
            match self.indices[a].cmp(&other.indices[b]) {
                std::cmp::Ordering::Less => a += 1,
                std::cmp::Ordering::Greater => b += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[a] * other.values[b];
                    a += 1;
                    b += 1;
                }
            }
        }
        sum
    }

    pub fn cosine(&self, other: &SparseVector) -> f32 {
        let denom = self.norm() * other.norm();
        if denom == 0.0 { 0.0 } else { self.dot(other) / denom }
    }

    /// Largest index referenced, if any.
    pub fn max_index(&self) -> Option<u32> { self.indices.last().copied() }
}

/// The fitted feature space. Terms are sorted, so a term's index is stable for
/// a given corpus regardless of document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "VocabularyRepr", into = "VocabularyRepr")]
pub struct Vocabulary {
    terms: Vec<String>,
    idf: Vec<f32>,
    ngram_max: usize,
    lookup: HashMap<String, u32>,
}

#[derive(Serialize, Deserialize)]
struct VocabularyRepr {
    terms: Vec<String>,
    idf: Vec<f32>,
    ngram_max: usize,
}

impl From<VocabularyRepr> for Vocabulary {
    fn from(r: VocabularyRepr) -> Self { Vocabulary::new(r.terms, r.idf, r.ngram_max) }
}

impl From<Vocabulary> for VocabularyRepr {
    fn from(v: Vocabulary) -> Self { VocabularyRepr { terms: v.terms, idf: v.idf, ngram_max: v.ngram_max } }
}

impl Vocabulary {
    fn new(terms: Vec<String>, idf: Vec<f32>, ngram_max: usize) -> Self {
        let lookup = terms.iter().enumerate().map(|(i, t)| (t.clone(), i as u32)).collect();
        Self { terms, idf, ngram_max, lookup }
    }

    pub fn len(&self) -> usize { self.terms.len() }

    pub fn is_empty(&self) -> bool { self.terms.is_empty() }

    pub fn term(&self, index: u32) -> Option<&str> { self.terms.get(index as usize).map(String::as_str) }

    pub fn index_of(&self, term: &str) -> Option<u32> { self.lookup.get(term).copied() }

    /// True when the idf table lines up with the terms.
    pub fn is_consistent(&self) -> bool { self.terms.len() == self.idf.len() && self.lookup.len() == self.terms.len() }

    /// Project analyzed terms into this space. Unknown n-grams are ignored.
    pub fn transform(&self, terms: &[String]) -> SparseVector { self.weigh(&count_ngrams(terms, self.ngram_max)) }

    fn weigh(&self, counts: &HashMap<String, u32>) -> SparseVector {
        let weights = counts
            .iter()
            .filter_map(|(t, &c)| self.index_of(t).map(|i| (i, c as f32 * self.idf[i as usize])))
            .collect();
        SparseVector::from_weights(weights)
    }
}

#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    pub ngram_max: usize,
    pub max_features: usize,
    pub max_df: f32,
    pub min_df: usize,
}

impl Default for TfidfVectorizer {
    fn default() -> Self { Self::from_settings(&IndexSettings::default()) }
}

impl TfidfVectorizer {
    pub fn from_settings(settings: &IndexSettings) -> Self {
        Self {
            ngram_max: settings.ngram_max.max(1),
            max_features: settings.max_features,
            max_df: settings.max_df,
            min_df: settings.min_df.max(1),
        }
    }

    /// Fit a vocabulary over `corpus` (one analyzed term list per document) and
    /// return it with one row per document, in corpus order.
    pub fn fit_transform(&self, corpus: &[Vec<String>]) -> Result<(Vocabulary, Vec<SparseVector>)> {
        if corpus.is_empty() { return Err(Error::Validation("cannot fit an empty corpus".into())); }
        let counts: Vec<HashMap<String, u32>> = corpus.iter().map(|terms| count_ngrams(terms, self.ngram_max)).collect();

        let mut df: HashMap<&str, usize> = HashMap::new();
        let mut tf: HashMap<&str, u64> = HashMap::new();
        for doc in &counts {
            for (term, &c) in doc {
                *df.entry(term.as_str()).or_default() += 1;
                *tf.entry(term.as_str()).or_default() += u64::from(c);
            }
        }

        let n = counts.len();
        let max_docs = (self.max_df as f64 * n as f64).floor() as usize;
        let mut kept: Vec<(&str, u64)> = tf
            .into_iter()
            .filter(|(t, _)| {
                let d = df[t];
                d >= self.min_df && d <= max_docs
            })
            .collect();
        if kept.is_empty() {
            return Err(Error::Validation("empty vocabulary after pruning; documents may contain only stop words".into()));
        }
        kept.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        kept.truncate(self.max_features);

        let mut terms: Vec<String> = kept.into_iter().map(|(t, _)| t.to_string()).collect();
        terms.sort_unstable();
        let idf = terms
            .iter()
            .map(|t| (((1 + n) as f32) / ((1 + df[t.as_str()]) as f32)).ln() + 1.0)
            .collect();
        let vocabulary = Vocabulary::new(terms, idf, self.ngram_max);
        let rows = counts.iter().map(|c| vocabulary.weigh(c)).collect();
        Ok((vocabulary, rows))
    }
}

/// Counts of every n-gram (space-joined) for n in 1..=ngram_max.
fn count_ngrams(terms: &[String], ngram_max: usize) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for n in 1..=ngram_max.max(1) {
        for window in terms.windows(n) {
            *counts.entry(window.join(" ")).or_insert(0) += 1;
        }
    }
    counts
}
