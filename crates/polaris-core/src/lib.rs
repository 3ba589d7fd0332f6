//! polaris-core
//!
//! Domain types, error taxonomy, configuration and the seams (`DocumentIndex`,
//! `Searcher`) shared by the text, index, cache and service crates.

pub mod config;
pub mod data_processor;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
