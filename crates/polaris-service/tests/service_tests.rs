use std::sync::Arc;
use std::time::Duration;

use polaris_cache::Cache;
use polaris_core::config::Settings;
use polaris_core::types::{Document, HealthStatus, SearchFilters};
use polaris_index::LexicalIndex;
use polaris_service::SearchService;

fn doc_a() -> Document {
    Document::new("a", "Lei A", "Art. 1º Direito à vida. Art. 2º Direito à liberdade.").with_category("constituicao")
}

fn doc_b() -> Document {
    Document::new("b", "Lei B", "Artigo 5º Direitos sociais incluem saúde.").with_category("social").with_source("planalto")
}

fn empty_service() -> SearchService {
    let settings = Settings::default();
    let index = Arc::new(LexicalIndex::in_memory(&settings).expect("index"));
    let cache = Arc::new(Cache::new(100, Duration::from_secs(60)));
    SearchService::new(index, &settings, cache)
}

fn seeded() -> SearchService {
    let service = empty_service();
    assert!(service.index_document(doc_a()).expect("a"));
    assert!(service.index_document(doc_b()).expect("b"));
    service
}

fn ids(service: &SearchService, query: &str) -> Vec<String> {
    service
        .search(query, &SearchFilters::default(), 10)
        .expect("search")
        .into_iter()
        .map(|r| r.document_id)
        .collect()
}

#[test]
fn repeated_search_is_served_from_cache() {
    let service = seeded();
    let first = service.search("direito", &SearchFilters::default(), 10).expect("search");
    let hits_before = service.cache().stats().hits;
    let second = service.search("direito", &SearchFilters::default(), 10).expect("search");
    assert_eq!(first, second);
    assert_eq!(service.cache().stats().hits, hits_before + 1);
}

#[test]
fn indexing_a_document_drops_cached_results() {
    let service = seeded();
    assert!(!ids(&service, "direito").contains(&"c".to_string()));
    assert!(service.index_document(Document::new("c", "Lei C", "Direito à saúde.")).expect("c"));
    assert!(ids(&service, "direito").contains(&"c".to_string()));
}

#[test]
fn batch_ingest_reports_and_invalidates() {
    let service = seeded();
    assert!(!ids(&service, "direito").contains(&"c".to_string()));
    let report = service.index_documents(vec![
        Document::new("c", "Lei C", "Direito à saúde."),
        Document::new("d", "vazio", "   "),
    ]);
    assert!(report.success);
    assert_eq!(report.processed_documents, 1);
    assert_eq!(report.total_chunks, 1);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].starts_with("d:"));
    assert!(ids(&service, "direito").contains(&"c".to_string()));
}

#[test]
fn removing_a_document_drops_cached_results() {
    let service = seeded();
    assert!(ids(&service, "direito").contains(&"b".to_string()));
    assert!(service.remove_document("b").expect("remove"));
    assert!(!ids(&service, "direito").contains(&"b".to_string()));
    assert!(!service.remove_document("b").expect("second remove"));
}

#[test]
fn similar_documents_are_cached() {
    let service = seeded();
    let first = service.find_similar("a", 5).expect("similar");
    let hits_before = service.cache().stats().hits;
    assert_eq!(service.find_similar("a", 5).expect("similar"), first);
    assert_eq!(service.cache().stats().hits, hits_before + 1);
    assert!(first.iter().all(|r| r.document_id != "a"));
    assert!(service.find_similar("missing", 5).expect("unknown").is_empty());
}

#[test]
fn rebuild_reports_outcome() {
    let empty = empty_service();
    let report = empty.rebuild_index();
    assert!(!report.success);
    assert_eq!(report.documents_indexed, 0);

    let service = seeded();
    let report = service.rebuild_index();
    assert!(report.success);
    assert_eq!(report.documents_indexed, 2);
    assert_eq!(service.stats().documents, 2);
}

#[test]
fn health_reflects_index_and_cache() {
    let empty = empty_service().health();
    assert_eq!(empty.search, HealthStatus::Warning);
    assert_eq!(empty.cache, HealthStatus::Healthy);
    assert_eq!(empty.overall, HealthStatus::Warning);

    let seeded = seeded().health();
    assert_eq!(seeded.overall, HealthStatus::Healthy);
}

#[test]
fn keys_ignore_spelling_and_clamped_limits() {
    let service = seeded();
    let filters = SearchFilters::default();
    let default_limit = Settings::default().search.default_limit;
    assert_eq!(service.search_key("Direito", &filters, 10), service.search_key("  direito ", &filters, 10));
    assert_eq!(service.search_key("direito", &filters, 0), service.search_key("direito", &filters, default_limit));
    assert_eq!(service.search_key("direito", &filters, 500), service.search_key("direito", &filters, 20));
    assert_ne!(service.search_key("direito", &filters, 10), service.search_key("direito", &SearchFilters::category("social"), 10));
    assert!(service.search_key("direito", &filters, 10).starts_with("search:"));
}

#[test]
fn persisted_index_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = Settings::default();
    settings.data.index_dir = "idx".to_string();

    {
        let service = SearchService::from_settings(&settings, dir.path()).expect("service");
        service.index_document(doc_a()).expect("a");
        service.index_document(doc_b()).expect("b");
        service.save().expect("save");
    }
    assert!(dir.path().join("idx").is_dir());

    let reopened = SearchService::from_settings(&settings, dir.path()).expect("reopen");
    assert_eq!(reopened.stats().documents, 2);
    let found = ids(&reopened, "direito");
    assert!(found.contains(&"a".to_string()) && found.contains(&"b".to_string()));
}

#[tokio::test]
async fn sweeper_runs_inside_runtime() {
    let service = empty_service();
    service.cache().set("k", &1, Some(Duration::from_millis(10)));
    let handle = service.start_expiry_sweeper(Duration::from_millis(20)).expect("sweeper");
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(service.cache().stats().local_entries, 0);
    handle.abort();
}
