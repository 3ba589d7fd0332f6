//! polaris-index
//!
//! TF-IDF vectorizer, the persisted lexical index and the cosine search engine
//! built on top of it.

pub mod index;
pub mod search;
pub mod storage;
pub mod vectorizer;

pub use index::{IndexState, IndexedDocument, LexicalIndex};
pub use search::SearchEngine;
pub use vectorizer::{SparseVector, TfidfVectorizer, Vocabulary};
