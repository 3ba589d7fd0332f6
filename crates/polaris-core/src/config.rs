//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `POLARIS_*` env vars
//! (`__` separates nested keys, e.g. `POLARIS_CACHE__REDIS_URL`). Every setting has
//! a default, so a bare checkout runs without any file present.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("POLARIS_").split("__"));

        let config = Self { figment };
        config.settings()?.validate()?;
        Ok(config)
    }

    /// Build from an inline TOML document layered over the defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let figment = Figment::new().merge(Toml::string(toml));
        let config = Self { figment };
        config.settings()?.validate()?;
        Ok(config)
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{}': {}", key, e)))
    }

    pub fn settings(&self) -> Result<Settings> {
        self.figment.extract().map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub chunking: ChunkingSettings,
    pub normalizer: NormalizerSettings,
    pub index: IndexSettings,
    pub search: SearchSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub raw_dir: String,
    pub index_dir: String,
}

impl Default for DataSettings {
    fn default() -> Self { Self { raw_dir: "data/raw".to_string(), index_dir: "search_index".to_string() } }
}

/// A structural marker: chunks whose text matches `pattern` are labelled `label`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerSpec {
    pub label: String,
    pub pattern: String,
}

impl MarkerSpec {
    fn new(label: &str, pattern: &str) -> Self { Self { label: label.to_string(), pattern: pattern.to_string() } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Max chars in a chunk's core region.
    pub max_size: usize,
    /// Chars borrowed from each neighbour.
    pub overlap: usize,
    /// Matched case-insensitively, in priority order.
    pub markers: Vec<MarkerSpec>,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            max_size: 1000,
            overlap: 200,
            markers: vec![
                MarkerSpec::new("article", r"\bArt\.?\s*\d+"),
                MarkerSpec::new("article", r"\bArtigo\s+\d+"),
                MarkerSpec::new("section", r"\bSeção\s+[IVX]+"),
                MarkerSpec::new("chapter", r"\bCapítulo\s+[IVX]+"),
                MarkerSpec::new("paragraph", r"§\s*\d+"),
                MarkerSpec::new("clause", r"\bInciso\s+[IVX]+"),
                MarkerSpec::new("subclause", r"\bAlínea\s+[a-z]\)"),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerSettings {
    pub remove_stop_words: bool,
    pub stem: bool,
    pub language: String,
}

impl Default for NormalizerSettings {
    fn default() -> Self { Self { remove_stop_words: true, stem: true, language: "portuguese".to_string() } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub max_features: usize,
    pub ngram_max: usize,
    /// Terms present in more than this fraction of documents are pruned.
    pub max_df: f32,
    pub min_df: usize,
    pub max_document_chars: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self { max_features: 10_000, ngram_max: 2, max_df: 1.0, min_df: 1, max_document_chars: 2_000_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub min_score: f32,
    pub default_limit: usize,
    pub max_limit: usize,
    pub max_query_chars: usize,
    pub max_highlights: usize,
    pub highlight_chars: usize,
    pub snippet_chars: usize,
    pub similar_snippet_chars: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            min_score: 0.1,
            default_limit: 10,
            max_limit: 20,
            max_query_chars: 1000,
            max_highlights: 3,
            highlight_chars: 200,
            snippet_chars: 500,
            similar_snippet_chars: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// `None` runs on the local tier alone.
    pub redis_url: Option<String>,
    pub namespace: String,
    pub default_ttl_secs: u64,
    pub result_ttl_secs: u64,
    pub local_capacity: usize,
    pub timeout_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub sweep_interval_secs: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            namespace: "polaris".to_string(),
            default_ttl_secs: 3600,
            result_ttl_secs: 300,
            local_capacity: 1000,
            timeout_ms: 250,
            reconnect_backoff_ms: 5000,
            sweep_interval_secs: None,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: &str| -> Result<()> { Err(Error::InvalidConfig(msg.to_string())) };
        if self.chunking.max_size == 0 { return bad("chunking.max_size must be > 0"); }
        if self.chunking.overlap >= self.chunking.max_size { return bad("chunking.overlap must be smaller than chunking.max_size"); }
        if self.index.ngram_max == 0 { return bad("index.ngram_max must be >= 1"); }
        if self.index.max_features == 0 { return bad("index.max_features must be > 0"); }
        if !(self.index.max_df > 0.0 && self.index.max_df <= 1.0) { return bad("index.max_df must be in (0, 1]"); }
        if !(0.0..=1.0).contains(&self.search.min_score) { return bad("search.min_score must be in [0, 1]"); }
        if self.search.max_limit == 0 { return bad("search.max_limit must be > 0"); }
        if self.search.max_query_chars == 0 { return bad("search.max_query_chars must be > 0"); }
        if self.cache.local_capacity == 0 { return bad("cache.local_capacity must be > 0"); }
        Ok(())
    }
}

/// `~` and `$VAR`/`${VAR}` expanded; unknown variables are left as written.
/// The result is not canonicalized.
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let raw = input.as_ref();
    let with_env = shellexpand::env(raw).unwrap_or(std::borrow::Cow::Borrowed(raw));
    PathBuf::from(shellexpand::tilde(&with_env).as_ref())
}

/// Configured paths are relative to `base` (the working directory for the CLI)
/// unless they expand to an absolute path.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let path = expand_path(p);
    if path.is_absolute() { path } else { base.join(path) }
}
