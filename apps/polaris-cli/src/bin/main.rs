use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use polaris_core::config::{resolve_with_base, Config, Settings};
use polaris_core::data_processor::DataProcessor;
use polaris_core::types::{SearchFilters, SearchResult};
use polaris_service::SearchService;

/// How many documents go into one refit while ingesting.
const INGEST_BATCH: usize = 500;

#[derive(Parser, Debug)]
#[command(name = "polaris", about = "Lexical search over a local legal document corpus")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract every supported file under a directory and index it
    Ingest {
        /// Defaults to `data.raw_dir`
        dir: Option<PathBuf>,
        /// Stop after this many files
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Ranked search
    Query {
        query: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        source: Option<String>,
        /// 0 uses `search.default_limit`
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Documents most similar to an indexed one
    Similar {
        id: String,
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
    /// Drop a document from the index
    Remove { id: String },
    /// Re-fit the vocabulary over the whole corpus
    Rebuild,
    /// Index statistics
    Stats,
    /// Index and cache health
    Health,
    /// Remove cached entries matching a glob pattern (everything when omitted)
    CacheClear { pattern: Option<String> },
    /// Interactive query loop on a warm cache
    Shell,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "polaris=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let settings = config.settings()?;
    let base_dir = std::env::current_dir()?;
    let service = SearchService::from_settings(&settings, &base_dir).context("opening search service")?;

    match cli.command {
        Command::Ingest { dir, limit } => {
            let data_dir = dir.unwrap_or_else(|| resolve_with_base(&base_dir, &settings.data.raw_dir));
            ingest(&service, &data_dir, limit)?;
        }
        Command::Query { query, category, source, limit, json } => {
            let filters = SearchFilters { category, source };
            let results = service.search(&query, &filters, limit)?;
            if json { println!("{}", serde_json::to_string_pretty(&results)?); } else { print_results(&query, &results); }
        }
        Command::Similar { id, limit } => {
            let results = service.find_similar(&id, limit)?;
            print_results(&format!("similar to {}", id), &results);
        }
        Command::Remove { id } => {
            if service.remove_document(&id)? { println!("✅ Removed {}", id); } else { println!("⚠️  {} is not indexed", id); }
        }
        Command::Rebuild => {
            let report = service.rebuild_index();
            if report.success {
                println!("✅ Rebuilt index over {} documents", report.documents_indexed);
            } else {
                println!("❌ Rebuild failed; previous index kept");
            }
        }
        Command::Stats => print_stats(&service),
        Command::Health => println!("{}", serde_json::to_string_pretty(&service.health())?),
        Command::CacheClear { pattern } => {
            if service.cache().clear(pattern.as_deref()) { println!("✅ Cache cleared"); } else { println!("❌ Invalid pattern"); }
        }
        Command::Shell => shell(&service, &settings)?,
    }
    Ok(())
}

fn ingest(service: &SearchService, data_dir: &Path, limit: Option<usize>) -> Result<()> {
    println!("Polaris Indexer\n===============");
    println!("Data directory: {}", data_dir.display());
    if let Some(limit) = limit { println!("🔢 Limiting to {} files", limit); }

    let documents = DataProcessor::new().process_directory(data_dir, limit)?;
    if documents.is_empty() { println!("No documents to index"); return Ok(()); }

    let pb = ProgressBar::new(documents.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} documents ({percent}%) {msg}")?
            .progress_chars("#>-"),
    );
    let (mut processed, mut chunks, mut failed) = (0usize, 0usize, Vec::new());
    let mut pending = documents.into_iter().peekable();
    while pending.peek().is_some() {
        let batch: Vec<_> = pending.by_ref().take(INGEST_BATCH).collect();
        let size = batch.len() as u64;
        let report = service.index_documents(batch);
        if !report.success { warn!(failed = report.failed.len(), "batch not indexed"); }
        processed += report.processed_documents;
        chunks += report.total_chunks;
        failed.extend(report.failed);
        pb.inc(size);
        pb.set_message(format!("{} indexed", processed));
    }
    pb.finish_with_message("✅ Indexing completed!");

    println!("📊 Indexed {} documents ({} chunks)", processed, chunks);
    if !failed.is_empty() {
        println!("⚠️  {} documents skipped:", failed.len());
        for reason in &failed { println!("   - {}", reason); }
    }
    println!("\n💡 To search, use: polaris query '<query>'");
    Ok(())
}

fn print_results(heading: &str, results: &[SearchResult]) {
    println!("🔍 {} ({} results)", heading, results.len());
    for (rank, r) in results.iter().enumerate() {
        println!("\n{}. {} [{}] score {:.3}", rank + 1, r.title, r.document_id, r.score);
        if !r.category.is_empty() || !r.source.is_empty() { println!("   {} / {}", r.category, r.source); }
        println!("   {}", r.snippet.replace('\n', " "));
        for h in &r.highlights { println!("   » {}", h.replace('\n', " ")); }
    }
}

fn print_stats(service: &SearchService) {
    let stats = service.stats();
    let cache = service.cache().stats();
    println!("📊 Documents: {}  Chunks: {}  Vocabulary: {}", stats.documents, stats.chunks, stats.vocabulary_size);
    println!("   Index size: {} bytes", stats.index_bytes);
    if let Some(at) = stats.last_updated { println!("   Last updated: {}", at.to_rfc3339()); }
    for (category, n) in &stats.categories { println!("   category {:<24} {}", category, n); }
    for (source, n) in &stats.sources { println!("   source   {:<24} {}", source, n); }
    println!(
        "🗄️  Cache: {}/{} local entries, hit rate {:.1}%, remote {}",
        cache.local_entries,
        cache.local_capacity,
        cache.hit_rate * 100.0,
        if !cache.remote_configured { "off" } else if cache.remote_available { "up" } else { "down" }
    );
}

/// Read queries from stdin until EOF or `:quit`. `:similar <id>` and
/// `:stats` are the only other commands; anything else is a query.
fn shell(service: &SearchService, settings: &Settings) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let _guard = rt.enter();
    let sweeper = match settings.cache.sweep_interval_secs {
        Some(secs) => Some(service.start_expiry_sweeper(Duration::from_secs(secs))?),
        None => None,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("polaris> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 { break; }
        let line = line.trim();
        match line.split_once(' ').unwrap_or((line, "")) {
            ("", _) => continue,
            (":quit" | ":q", _) => break,
            (":stats", _) => print_stats(service),
            (":similar", id) => match service.find_similar(id.trim(), 0) {
                Ok(results) => print_results(&format!("similar to {}", id.trim()), &results),
                Err(e) => eprintln!("❌ {}", e),
            },
            _ => match service.search(line, &SearchFilters::default(), 0) {
                Ok(results) => print_results(line, &results),
                Err(e) => eprintln!("❌ {}", e),
            },
        }
    }
    if let Some(handle) = sweeper { handle.abort(); }
    Ok(())
}
