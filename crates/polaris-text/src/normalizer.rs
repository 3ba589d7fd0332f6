//! Text normalization applied identically to indexed content and to queries.
//!
//! `normalize` is the pure, idempotent cleanup step (case-fold, drop control and
//! invisible chars, collapse whitespace, trim). `terms` runs the normalized text
//! through a tantivy analyzer that optionally removes stop words and stems. One
//! `Normalizer` instance is shared by the write and read paths, so the toggles
//! can never disagree between index build and query time.

use tantivy::tokenizer::{
    Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter, TextAnalyzer, TokenStream,
};

use polaris_core::config::NormalizerSettings;
use polaris_core::error::{Error, Result};

use crate::stop_words;

const MAX_TOKEN_LEN: usize = 40;

#[derive(Clone)]
pub struct Normalizer {
    analyzer: TextAnalyzer,
    settings: NormalizerSettings,
}

impl Default for Normalizer {
    fn default() -> Self {
        let settings = NormalizerSettings::default();
        let analyzer = build_analyzer(settings.remove_stop_words, settings.stem.then_some(Language::Portuguese));
        Self { analyzer, settings }
    }
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer").field("settings", &self.settings).finish()
    }
}

impl Normalizer {
    pub fn new(settings: &NormalizerSettings) -> Result<Self> {
        let stem = if settings.stem { Some(parse_language(&settings.language)?) } else { None };
        Ok(Self { analyzer: build_analyzer(settings.remove_stop_words, stem), settings: settings.clone() })
    }

    pub fn settings(&self) -> &NormalizerSettings { &self.settings }

    pub fn normalize(&self, text: &str) -> String { normalize(text) }

    /// Normalize, tokenize and (optionally) filter stop words and stem.
    pub fn terms(&self, text: &str) -> Vec<String> {
        let normalized = normalize(text);
        if normalized.is_empty() { return Vec::new(); }
        let mut analyzer = self.analyzer.clone();
        let mut stream = analyzer.token_stream(&normalized);
        let mut terms = Vec::new();
        while stream.advance() { terms.push(stream.token().text.clone()); }
        terms
    }
}

/// Case-fold, strip non-printable chars, collapse whitespace runs, trim.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() { Some(' ') }
            else if c.is_control() || is_invisible(c) { None }
            else { Some(c) }
        })
        .collect();
    cleaned.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_invisible(c: char) -> bool { matches!(c, '\u{200B}'..='\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}') }

fn build_analyzer(remove_stop_words: bool, stem: Option<Language>) -> TextAnalyzer {
    let base = TextAnalyzer::builder(SimpleTokenizer::default()).filter(RemoveLongFilter::limit(MAX_TOKEN_LEN)).filter(LowerCaser);
    match (remove_stop_words, stem) {
        (true, Some(lang)) => base.filter(StopWordFilter::remove(stop_words::default_set())).filter(Stemmer::new(lang)).build(),
        (true, None) => base.filter(StopWordFilter::remove(stop_words::default_set())).build(),
        (false, Some(lang)) => base.filter(Stemmer::new(lang)).build(),
        (false, None) => base.build(),
    }
}

fn parse_language(name: &str) -> Result<Language> {
    let lang = match name.trim().to_ascii_lowercase().as_str() {
        "portuguese" | "pt" => Language::Portuguese,
        "english" | "en" => Language::English,
        "spanish" | "es" => Language::Spanish,
        "french" | "fr" => Language::French,
        "italian" | "it" => Language::Italian,
        "german" | "de" => Language::German,
        other => return Err(Error::InvalidConfig(format!("unsupported stemming language: {other}"))),
    };
    Ok(lang)
}
