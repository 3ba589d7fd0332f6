//! Upstream extraction collaborator: turns files on disk into `Document`s.
//!
//! Extractors are looked up by file extension in a strategy table, so adding a
//! format is one `register` call. Only plain text formats are built in.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::types::{Document, Meta};

pub type Extractor = fn(&Path) -> Result<String>;

/// Text plus metadata extracted from one file.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub text: String,
    pub metadata: Meta,
}

pub struct DataProcessor {
    extractors: BTreeMap<String, Extractor>,
}

impl Default for DataProcessor {
    fn default() -> Self {
        let mut processor = Self { extractors: BTreeMap::new() };
        processor.register("txt", read_text);
        processor.register("md", read_text);
        processor
    }
}

impl DataProcessor {
    pub fn new() -> Self { Self::default() }

    pub fn register(&mut self, extension: &str, extractor: Extractor) {
        self.extractors.insert(extension.to_ascii_lowercase(), extractor);
    }

    pub fn supported_extensions(&self) -> Vec<&str> { self.extractors.keys().map(String::as_str).collect() }

    pub fn supports(&self, path: &Path) -> bool { extension_of(path).is_some_and(|e| self.extractors.contains_key(&e)) }

    pub fn process_document(&self, path: &Path) -> Result<ExtractedDocument> {
        let ext = extension_of(path).ok_or_else(|| Error::Validation(format!("no file extension: {}", path.display())))?;
        let extractor = self
            .extractors
            .get(&ext)
            .ok_or_else(|| Error::Validation(format!("unsupported format: .{ext}")))?;
        let text = strip_control(&extractor(path)?);
        if text.trim().is_empty() {
            return Err(Error::Validation(format!("no text extracted from {}", path.display())));
        }
        let mut metadata = Meta::new();
        metadata.insert("filename".into(), path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default());
        metadata.insert("extension".into(), format!(".{ext}"));
        metadata.insert("size_bytes".into(), fs::metadata(path).map(|m| m.len()).unwrap_or(0).to_string());
        metadata.insert("text_length".into(), text.chars().count().to_string());
        metadata.insert("word_count".into(), text.split_whitespace().count().to_string());
        Ok(ExtractedDocument { text, metadata })
    }

    /// Walk `data_dir` and extract every supported file, optionally stopping after `limit` files.
    /// Files that fail extraction are logged and skipped.
    pub fn process_directory(&self, data_dir: &Path, limit: Option<usize>) -> Result<Vec<Document>> {
        if !data_dir.is_dir() {
            return Err(Error::NotFound(format!("data directory {}", data_dir.display())));
        }
        let mut files = self.list_files(data_dir);
        if let Some(limit) = limit {
            if files.len() > limit { files.truncate(limit); info!(limit, "limited to first files"); }
        }
        let mut documents = Vec::with_capacity(files.len());
        for (file_index, file_path) in files.iter().enumerate() {
            info!(file = %file_path.display(), "processing file {}/{}", file_index + 1, files.len());
            match self.process_document(file_path) {
                Ok(extracted) => documents.push(self.to_document(data_dir, file_path, extracted)),
                Err(e) => warn!(file = %file_path.display(), error = %e, "skipping file"),
            }
        }
        info!(files = files.len(), documents = documents.len(), "directory processed");
        Ok(documents)
    }

    fn to_document(&self, data_dir: &Path, file_path: &Path, extracted: ExtractedDocument) -> Document {
        let relative = file_path.strip_prefix(data_dir).unwrap_or(file_path);
        let id = relative.with_extension("").to_string_lossy().replace('\\', "/");
        let title = file_path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| id.clone());
        let mut doc = Document::new(id, title, extracted.text)
            .with_source("file")
            .with_category(category_from_path(relative));
        doc.metadata = extracted.metadata;
        doc.metadata.insert("path".into(), file_path.to_string_lossy().to_string());
        doc
    }

    fn list_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && self.supports(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect();
        files.sort();
        files
    }
}

fn extension_of(path: &Path) -> Option<String> { path.extension().and_then(|s| s.to_str()).map(str::to_ascii_lowercase) }

fn category_from_path(relative: &Path) -> String {
    match relative.parent().and_then(|p| p.to_str()) {
        Some(parent) if !parent.is_empty() => parent.replace('\\', "/"),
        _ => "general".to_string(),
    }
}

fn read_text(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&fs::read(path)?).to_string()),
    }
}

/// Drop control chars except line structure, which the chunker relies on.
fn strip_control(text: &str) -> String {
    text.chars().filter(|c| !c.is_control() || matches!(c, '\n' | '\t')).collect()
}
