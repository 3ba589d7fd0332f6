use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use polaris_core::config::Settings;
use polaris_core::traits::DocumentIndex;
use polaris_core::types::{Document, HealthStatus, SearchFilters};
use polaris_index::storage;
use polaris_index::{LexicalIndex, SearchEngine};
use polaris_text::Chunker;

fn doc_a() -> Document {
    Document::new("a", "Lei A", "Art. 1º Direito à vida. Art. 2º Direito à liberdade.").with_category("constituicao")
}

fn doc_b() -> Document {
    Document::new("b", "Lei B", "Artigo 5º Direitos sociais incluem saúde.").with_category("social").with_source("planalto")
}

fn engine_with(index: LexicalIndex) -> SearchEngine {
    SearchEngine::new(Arc::new(index), Settings::default().search)
}

fn seeded() -> SearchEngine {
    let index = LexicalIndex::in_memory(&Settings::default()).expect("index");
    assert!(index.add(doc_a()).expect("add a"));
    assert!(index.add(doc_b()).expect("add b"));
    engine_with(index)
}

#[test]
fn direito_finds_both_documents() {
    let engine = seeded();
    let results = engine.search("direito", &SearchFilters::default(), 10).expect("search");
    let ids: Vec<&str> = results.iter().map(|r| r.document_id.as_str()).collect();
    assert_eq!(ids.len(), 2, "{results:?}");
    assert!(ids.contains(&"a") && ids.contains(&"b"));
    assert!(results.iter().all(|r| r.score >= 0.1));
    assert!(results[0].score >= results[1].score);
    assert!(results.iter().all(|r| !r.highlights.is_empty()));

    let chunker = Chunker::new(&Settings::default().chunking).expect("chunker");
    assert!(chunker.segments(&doc_a().raw_text).0.len() >= 2);
    assert_eq!(chunker.chunk_document(&doc_a()).len(), 1);
    assert_eq!(chunker.chunk_document(&doc_b()).len(), 1);
    assert_eq!(engine.index().stats().chunks, 2);
}

#[test]
fn repeated_queries_are_identical() {
    let engine = seeded();
    let first = engine.search("direito à vida", &SearchFilters::default(), 10).expect("search");
    for _ in 0..5 {
        assert_eq!(engine.search("direito à vida", &SearchFilters::default(), 10).expect("search"), first);
    }
}

#[test]
fn category_filter_is_applied_after_scoring() {
    let engine = seeded();
    let results = engine.search("direito", &SearchFilters::category("social"), 10).expect("search");
    assert_eq!(results.len(), 1);
    assert!(results.iter().all(|r| r.category == "social"));
    let by_source = engine.search("direito", &SearchFilters::source("planalto"), 10).expect("search");
    assert_eq!(by_source.len(), 1);
    assert_eq!(by_source[0].document_id, "b");
}

#[test]
fn empty_and_unknown_queries_return_nothing() {
    let engine = seeded();
    assert!(engine.search("   ", &SearchFilters::default(), 10).expect("blank").is_empty());
    assert!(engine.search("de da do", &SearchFilters::default(), 10).expect("stop words").is_empty());
    assert!(engine.search("xylophone", &SearchFilters::default(), 10).expect("oov").is_empty());
    let long = "a".repeat(5000);
    assert!(engine.search(&long, &SearchFilters::default(), 10).is_err());
}

#[test]
fn unfitted_index_searches_empty() {
    let engine = engine_with(LexicalIndex::in_memory(&Settings::default()).expect("index"));
    assert!(engine.search("direito", &SearchFilters::default(), 10).expect("search").is_empty());
    assert_eq!(engine.health(), HealthStatus::Warning);
}

#[test]
fn limit_is_bounded() {
    let index = LexicalIndex::in_memory(&Settings::default()).expect("index");
    for i in 0..30 {
        index.add(Document::new(format!("d{i}"), "Contrato", "contrato de locação residencial")).expect("add");
    }
    let engine = engine_with(index);
    assert_eq!(engine.search("contrato", &SearchFilters::default(), 1000).expect("search").len(), 20);
    assert_eq!(engine.search("contrato", &SearchFilters::default(), 0).expect("search").len(), 10);
    assert_eq!(engine.search("contrato", &SearchFilters::default(), 3).expect("search").len(), 3);
}

#[test]
fn similar_never_returns_itself() {
    let index = LexicalIndex::in_memory(&Settings::default()).expect("index");
    index.add(Document::new("x", "Contrato", "contrato de locação residencial urbana")).expect("add");
    index.add(Document::new("y", "Contrato", "contrato de locação comercial urbana")).expect("add");
    index.add(Document::new("z", "Receita", "bolo de cenoura com chocolate")).expect("add");
    let engine = engine_with(index);
    let similar = engine.find_similar("x", 10).expect("similar");
    assert!(similar.iter().all(|r| r.document_id != "x"));
    assert_eq!(similar.first().map(|r| r.document_id.as_str()), Some("y"));
    assert!(engine.find_similar("missing", 10).expect("similar").is_empty());
}

#[test]
fn persisted_index_answers_like_the_original() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = Settings::default();
    let queries = ["direito", "saúde", "liberdade vida"];

    let original = LexicalIndex::open(&settings, dir.path()).expect("open");
    original.add(doc_a()).expect("add");
    original.add(doc_b()).expect("add");
    assert!(original.rebuild());
    original.save().expect("save");
    let original = engine_with(original);
    let expected: Vec<_> = queries.iter().map(|q| original.search(q, &SearchFilters::default(), 10).expect("search")).collect();

    let reloaded = engine_with(LexicalIndex::open(&settings, dir.path()).expect("reopen"));
    let actual: Vec<_> = queries.iter().map(|q| reloaded.search(q, &SearchFilters::default(), 10).expect("search")).collect();
    assert_eq!(actual, expected);
    assert_eq!(reloaded.health(), HealthStatus::Healthy);
    assert!(reloaded.index().stats().index_bytes > 0);
}

#[test]
fn corrupt_artifacts_start_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = Settings::default();
    let index = LexicalIndex::open(&settings, dir.path()).expect("open");
    index.add(doc_a()).expect("add");
    let [_, matrix, _] = storage::artifact_paths(dir.path()).expect("pointer").expect("saved");
    fs::write(matrix, b"[1, 2").expect("corrupt");

    let reopened = engine_with(LexicalIndex::open(&settings, dir.path()).expect("reopen"));
    assert!(reopened.index().is_empty());
    assert!(reopened.search("direito", &SearchFilters::default(), 10).expect("search").is_empty());
}

#[test]
fn failed_refit_keeps_previous_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = LexicalIndex::open(&Settings::default(), dir.path()).expect("open");
    index.add(Document::new("1", "x", "alpha beta")).expect("add");
    index.add(Document::new("2", "x", "alpha beta")).expect("add");
    drop(index);

    // Terms shared by more than half the corpus are pruned, so a third copy empties the vocabulary.
    let mut strict = Settings::default();
    strict.index.max_df = 0.5;
    let index = LexicalIndex::open(&strict, dir.path()).expect("reopen");
    let before = index.snapshot();
    assert!(!index.add(Document::new("3", "x", "alpha beta")).expect("add"));
    let after = index.snapshot();
    assert_eq!(after.generation, before.generation);
    assert_eq!(after.documents.len(), 2);
    assert!(!index.contains("3"));

    let engine = engine_with(index);
    assert_eq!(engine.search("alpha", &SearchFilters::default(), 10).expect("search").len(), 2);
}

#[test]
fn removal_takes_document_out_of_results() {
    let engine = seeded();
    assert!(engine.index().remove("a").expect("remove"));
    let results = engine.search("direito", &SearchFilters::default(), 10).expect("search");
    assert_eq!(results.iter().map(|r| r.document_id.as_str()).collect::<Vec<_>>(), vec!["b"]);
}

#[test]
fn searches_during_writes_see_whole_snapshots() {
    let engine = seeded();
    let writing = AtomicBool::new(true);
    let title_of = |id: &str| match id {
        "a" => "Lei A".to_string(),
        "b" => "Lei B".to_string(),
        w => format!("Lei {}", w.to_uppercase()),
    };

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let mut rounds = 0;
                while writing.load(Ordering::SeqCst) || rounds < 5 {
                    rounds += 1;
                    let state = engine.index().snapshot();
                    if let Some(vocab) = &state.vocabulary {
                        assert_eq!(state.matrix.len(), state.documents.len());
                        assert!(state.matrix.iter().all(|row| row.max_index().map_or(true, |i| (i as usize) < vocab.len())));
                    }

                    let results = engine.search("direito", &SearchFilters::default(), 20).expect("search");
                    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
                    for r in &results {
                        assert!(r.document_id == "a" || r.document_id == "b" || r.document_id.starts_with('w'), "{r:?}");
                        assert_eq!(r.title, title_of(&r.document_id));
                    }
                }
            });
        }

        let index = engine.index();
        for i in 0..30 {
            let id = format!("w{i}");
            let doc = Document::new(id.clone(), title_of(&id), format!("Direito número {i} sobre moradia."));
            index.add(doc).expect("add");
            if i % 2 == 1 {
                assert!(index.remove(&format!("w{}", i - 1)).expect("remove"));
            }
        }
        writing.store(false, Ordering::SeqCst);
    });

    let ids: Vec<String> = engine.index().snapshot().documents.iter().map(|d| d.document.id.clone()).collect();
    assert_eq!(ids.len(), 2 + 15);
    assert!(ids.iter().all(|id| id == "a" || id == "b" || id.trim_start_matches('w').parse::<usize>().is_ok_and(|n| n % 2 == 1)));
}
