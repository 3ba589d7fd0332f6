//! On-disk layout: every save writes three JSON artifacts, each stamped with
//! the same generation, into a fresh `gen-*` directory under the index
//! directory. The `CURRENT` file names the directory in use and is replaced
//! with a single rename, so readers see either the previous set or the new one.
//! A load only succeeds when all three artifacts are present, parse, and agree
//! on generation and dimensions.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use polaris_core::error::{Error, Result};

use crate::index::IndexedDocument;
use crate::vectorizer::{SparseVector, Vocabulary};

pub const CURRENT_FILE: &str = "CURRENT";
pub const VOCABULARY_FILE: &str = "vocabulary.json";
pub const MATRIX_FILE: &str = "matrix.json";
pub const DOCUMENTS_FILE: &str = "documents.json";

const GENERATION_PREFIX: &str = "gen-";

#[derive(Serialize, Deserialize)]
struct Artifact<T> {
    generation: u64,
    payload: T,
}

/// Everything needed to restore an index.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub generation: u64,
    pub vocabulary: Option<Vocabulary>,
    pub matrix: Vec<SparseVector>,
    pub documents: Vec<IndexedDocument>,
}

/// Directory holding the artifacts in use, if any save has completed.
pub fn current_generation_dir(dir: &Path) -> Result<Option<PathBuf>> {
    let pointer = dir.join(CURRENT_FILE);
    if !pointer.exists() { return Ok(None); }
    let name = fs::read_to_string(&pointer)?;
    let name = name.trim();
    if !name.starts_with(GENERATION_PREFIX) || name.contains(['/', '\\']) {
        return Err(Error::Storage(format!("corrupt pointer {}: {:?}", pointer.display(), name)));
    }
    Ok(Some(dir.join(name)))
}

/// Paths of the artifacts in use, if any save has completed.
pub fn artifact_paths(dir: &Path) -> Result<Option<[PathBuf; 3]>> {
    Ok(current_generation_dir(dir)?.map(|gen| files_in(&gen)))
}

fn files_in(gen: &Path) -> [PathBuf; 3] {
    [gen.join(VOCABULARY_FILE), gen.join(MATRIX_FILE), gen.join(DOCUMENTS_FILE)]
}

/// Write all three artifacts into a staging directory, move it into place and
/// then repoint `CURRENT` at it. Until that last rename succeeds the previous
/// artifacts stay in use; older generation directories are removed afterwards.
pub fn save(
    dir: &Path,
    generation: u64,
    vocabulary: Option<&Vocabulary>,
    matrix: &[SparseVector],
    documents: &[IndexedDocument],
) -> Result<()> {
    fs::create_dir_all(dir)?;
    let staging = tempfile::Builder::new().prefix(&format!(".{GENERATION_PREFIX}{generation}-")).tempdir_in(dir)?;
    let [vocab_path, matrix_path, docs_path] = files_in(staging.path());
    write_artifact(&vocab_path, &Artifact { generation, payload: vocabulary })?;
    write_artifact(&matrix_path, &Artifact { generation, payload: matrix })?;
    write_artifact(&docs_path, &Artifact { generation, payload: documents })?;

    let name = staging
        .path()
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.trim_start_matches('.').to_string())
        .ok_or_else(|| Error::Storage(format!("unnamed staging directory in {}", dir.display())))?;
    let target = dir.join(&name);
    fs::rename(staging.path(), &target)?;

    let mut pointer = NamedTempFile::new_in(dir)?;
    pointer.write_all(name.as_bytes())?;
    pointer.as_file().sync_all()?;
    if let Err(e) = pointer.persist(dir.join(CURRENT_FILE)) {
        let _ = fs::remove_dir_all(&target);
        return Err(Error::Storage(format!("persist {}: {}", CURRENT_FILE, e.error)));
    }
    remove_stale_generations(dir, &name);
    Ok(())
}

/// `Ok(None)` when no save has completed yet; `Err` when the set is
/// incomplete, unreadable or inconsistent.
pub fn load(dir: &Path) -> Result<Option<Snapshot>> {
    let Some(paths) = artifact_paths(dir)? else { return Ok(None) };
    if paths.iter().any(|p| !p.exists()) {
        return Err(Error::Storage(format!("incomplete index artifacts in {}", dir.display())));
    }
    let [vocab_path, matrix_path, docs_path] = paths;
    let vocab: Artifact<Option<Vocabulary>> = read(&vocab_path)?;
    let matrix: Artifact<Vec<SparseVector>> = read(&matrix_path)?;
    let docs: Artifact<Vec<IndexedDocument>> = read(&docs_path)?;

    if vocab.generation != matrix.generation || matrix.generation != docs.generation {
        return Err(Error::Storage(format!(
            "artifact generations disagree ({}, {}, {})",
            vocab.generation, matrix.generation, docs.generation
        )));
    }
    let snapshot = Snapshot { generation: docs.generation, vocabulary: vocab.payload, matrix: matrix.payload, documents: docs.payload };
    check_consistency(&snapshot)?;
    Ok(Some(snapshot))
}

/// Size on disk of the artifacts in use.
pub fn disk_usage(dir: &Path) -> u64 {
    let Ok(Some(paths)) = artifact_paths(dir) else { return 0 };
    paths.iter().filter_map(|p| fs::metadata(p).ok()).map(|m| m.len()).sum()
}

fn remove_stale_generations(dir: &Path, keep: &str) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let is_generation = name.trim_start_matches('.').starts_with(GENERATION_PREFIX);
        if is_generation && name != keep {
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                debug!(error = %e, dir = name, "stale index generation not removed");
            }
        }
    }
}

fn check_consistency(s: &Snapshot) -> Result<()> {
    let corrupt = |msg: String| -> Result<()> { Err(Error::Storage(msg)) };
    match &s.vocabulary {
        None if !s.matrix.is_empty() => return corrupt("matrix present without vocabulary".into()),
        None => {}
        Some(v) => {
            if !v.is_consistent() { return corrupt("vocabulary idf table does not match terms".into()); }
            if s.matrix.len() != s.documents.len() {
                return corrupt(format!("{} rows for {} documents", s.matrix.len(), s.documents.len()));
            }
            let dim = v.len() as u32;
            if s.matrix.iter().any(|row| row.indices.len() != row.values.len() || row.max_index().is_some_and(|i| i >= dim)) {
                return corrupt("matrix row exceeds vocabulary dimension".into());
            }
        }
    }
    Ok(())
}

fn write_artifact<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = fs::File::create(path)?;
    let mut writer = BufWriter::new(&file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    drop(writer);
    file.sync_all()?;
    Ok(())
}

fn read<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = fs::File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::Storage(format!("corrupt artifact {}: {}", path.display(), e)))
}
