use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use research_assist_core::{
    discover_documents, embedder_from_settings, ingest_paths_best_effort, AssistantConfig,
    EmbeddingIndex, HybridSearch, LocalCollection, MetadataFilter, Normalizer, OpenRouterClient,
    QdrantStore, ResearchAssistant, RetrievalEngine, SearchScope, Uuid, VectorIndex,
    WebSearchClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "research-assist", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding local collections
    #[arg(long, global = true, env = "RAG_COLLECTION_DIR")]
    collection_dir: Option<PathBuf>,

    /// Collection name
    #[arg(long, global = true, env = "RAG_COLLECTION")]
    collection: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Scope {
    Hybrid,
    Documents,
    Web,
}

impl From<Scope> for SearchScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Hybrid => SearchScope::Hybrid,
            Scope::Documents => SearchScope::DocumentsOnly,
            Scope::Web => SearchScope::WebOnly,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Normalize, chunk and index documents.
    Ingest {
        /// Files to ingest.
        paths: Vec<PathBuf>,
        /// Folder to scan recursively for supported documents.
        #[arg(long)]
        folder: Option<PathBuf>,
    },
    /// Search the indexed documents.
    Search {
        query: String,
        /// Number of results (defaults to RAG_DOC_RESULTS).
        #[arg(long)]
        top_k: Option<usize>,
        /// Only return chunks of this file.
        #[arg(long)]
        filename: Option<String>,
    },
    /// Answer a question from documents and the web, with citations.
    Ask {
        query: String,
        #[arg(long, value_enum, default_value_t = Scope::Hybrid)]
        scope: Scope,
    },
    /// Delete one indexed unit by id.
    Delete { id: Uuid },
    /// Remove every unit from the collection.
    Clear,
    /// Print collection statistics.
    Stats,
}

async fn open_index(config: &AssistantConfig) -> anyhow::Result<EmbeddingIndex> {
    let embedder = embedder_from_settings(&config.embedding)?;

    let backend: Arc<dyn VectorIndex> = match &config.qdrant_url {
        Some(url) => {
            let store = QdrantStore::new(url, &config.collection, embedder.dimensions());
            store.ensure_collection().await?;
            Arc::new(store)
        }
        None => Arc::new(LocalCollection::open(&config.collection_dir, &config.collection).await?),
    };

    Ok(EmbeddingIndex::new(backend, embedder))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = AssistantConfig::from_env()?;
    if let Some(dir) = cli.collection_dir {
        config.collection_dir = dir;
    }
    if let Some(collection) = cli.collection {
        config.collection = collection;
    }

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        collection = %config.collection,
        "research-assist boot"
    );

    let index = open_index(&config).await?;

    match cli.command {
        Command::Ingest { mut paths, folder } => {
            if let Some(folder) = &folder {
                paths.extend(discover_documents(folder));
            }
            if paths.is_empty() {
                anyhow::bail!("nothing to ingest: pass files or --folder with supported documents");
            }

            let report =
                ingest_paths_best_effort(paths, &Normalizer::default(), config.chunking, &index)
                    .await;

            for document in &report.documents {
                println!("{}: {} chunks", document.filename, document.chunk_count);
            }
            if !report.skipped_files.is_empty() {
                warn!(skipped_files = report.skipped_files.len(), "some files were skipped");
                for skipped in &report.skipped_files {
                    println!("skipped {}: {}", skipped.path.display(), skipped.reason);
                }
            }

            println!(
                "{} chunks from {} documents ingested at {}",
                report.chunk_count(),
                report.documents.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Search {
            query,
            top_k,
            filename,
        } => {
            let filter = filename.map(|filename| MetadataFilter::new().with("filename", filename));
            let top_k = top_k.unwrap_or(config.document_results);
            let results = RetrievalEngine::new(index)
                .retrieve_filtered(&query, top_k, filter.as_ref())
                .await?;

            if results.is_empty() {
                println!("No results found.");
            }
            for (position, item) in results.iter().enumerate() {
                println!("[{}] score={:.4} {}", position + 1, item.relevance_score, item.title);
                println!("  {}", item.snippet);
            }
        }
        Command::Ask { query, scope } => {
            let web = WebSearchClient::new(config.tavily_api_key.clone())?
                .with_time_budget(config.web_timeout);
            let search = HybridSearch::new(RetrievalEngine::new(index), web)
                .with_limits(config.document_results, config.web_results)
                .with_web_timeout(config.web_timeout);
            let consumer =
                OpenRouterClient::new(config.openrouter_api_key.clone(), &config.chat_model);
            let assistant = ResearchAssistant::new(search, consumer);

            let answer = assistant.answer_scoped(&query, scope.into()).await;
            println!("{}", answer.text);

            let cited = answer.evidence.cited();
            if !cited.is_empty() {
                println!("\nSources:");
                let locations = answer
                    .evidence
                    .document_results
                    .iter()
                    .chain(answer.evidence.web_results.iter())
                    .map(|item| item.url_or_filename.as_str());
                for (source, location) in cited.iter().zip(locations) {
                    println!("[{}] {} ({})", source.index, source.title, location);
                }
            }
        }
        Command::Delete { id } => {
            if index.delete(id).await? {
                println!("deleted {id}");
            } else {
                println!("no unit with id {id}");
            }
        }
        Command::Clear => {
            index.clear().await?;
            println!("cleared collection {}", index.collection());
        }
        Command::Stats => {
            let stats = index.stats().await?;
            println!("collection: {}", stats.collection);
            println!("units: {}", stats.unit_count);
            println!("embedding model: {}", stats.embedding_model);
        }
    }

    Ok(())
}
