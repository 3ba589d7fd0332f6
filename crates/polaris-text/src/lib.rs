//! polaris-text
//!
//! Text normalization shared by the index and query paths, and structure-aware
//! chunking of legal documents. See `normalizer` and `chunker`.

pub mod chunker;
pub mod normalizer;
pub mod stop_words;

pub use chunker::Chunker;
pub use normalizer::Normalizer;
