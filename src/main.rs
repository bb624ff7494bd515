use anyhow::{bail, Context};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use ragline::cache::{RagCache, SqliteCacheBackend};
use ragline::cli::{CacheAction, Cli, Commands, ConfigAction};
use ragline::config::Config;
use ragline::embedding::{BatchEmbeddingProcessor, EmbeddingProvider, HashEmbedder};
use ragline::index::{CollectionManager, InMemoryVectorStore, VectorStore};
use ragline::ingest::{DocumentIndexer, IndexOptions};
use ragline::retrieval::{RetrievalContext, RetrievalEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Chunk {
            file,
            strategy,
            size,
            overlap,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_chunk(&config, &file, strategy, size, overlap, json)?;
        }
        Commands::Query {
            question,
            docs,
            top_k,
            max_tokens,
            rerank,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_query(&config, &question, &docs, top_k, max_tokens, rerank, json).await?;
        }
        Commands::Cache { action } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_cache(&config, action).await?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "ragline=debug" } else { "ragline=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_chunk(
    config: &Config,
    file: &Path,
    strategy: Option<String>,
    size: Option<usize>,
    overlap: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let strategy = strategy.unwrap_or_else(|| config.chunking.strategy.clone());
    let chunker = ragline::chunking::Chunker::from_tag(
        &strategy,
        size.unwrap_or(config.chunking.chunk_size),
        overlap.unwrap_or(config.chunking.chunk_overlap),
    )?;

    let chunks = chunker.chunk(&document_id(file), &text);

    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    println!(
        "✓ {} chunks from {} ({} strategy)",
        chunks.len(),
        file.display(),
        chunker.strategy()
    );
    for chunk in &chunks {
        println!(
            "\n#{} [{}..{}] {} chars, {} words, {} sentences",
            chunk.chunk_index,
            chunk.start_pos,
            chunk.end_pos,
            chunk.char_count,
            chunk.word_count,
            chunk.sentence_count
        );
        println!("  {}", preview(&chunk.content, 120));
    }

    Ok(())
}

async fn cmd_query(
    config: &Config,
    question: &str,
    docs: &[PathBuf],
    top_k: Option<usize>,
    max_tokens: Option<usize>,
    rerank: bool,
    json: bool,
) -> anyhow::Result<()> {
    let provider = build_provider(config)?;
    let cache = build_cache(config)?;
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());

    let collection = &config.index.collection;
    CollectionManager::new(Arc::clone(&store))
        .ensure(collection, provider.dimension(), config.distance()?)
        .await?;

    let embedder = Arc::new(BatchEmbeddingProcessor::new(
        provider,
        Arc::clone(&cache),
        config.batch_config()?,
    ));
    let indexer = DocumentIndexer::new(
        Arc::clone(&embedder),
        Arc::clone(&store),
        Arc::clone(&cache),
        collection.as_str(),
    );

    let options = IndexOptions::new(config.chunker()?);
    for path in docs {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let title = path.file_name().and_then(|n| n.to_str());
        let indexed = indexer
            .index_document(&document_id(path), title, &text, &options)
            .await?;
        tracing::info!(
            "Indexed {} ({} chunks, {} failed)",
            path.display(),
            indexed.report.chunks,
            indexed.report.failed
        );
    }

    let mut engine = RetrievalEngine::new(embedder, store, Arc::clone(&cache), collection.as_str());
    if rerank || config.retrieval.rerank {
        if let Some(reranker) = build_reranker(config)? {
            engine = engine.with_reranker(reranker);
        }
    }

    let mut retrieval = config.retrieval_options().with_rerank(rerank || config.retrieval.rerank);
    if let Some(k) = top_k {
        retrieval = retrieval.with_top_k(k);
    }
    if let Some(budget) = max_tokens {
        retrieval = retrieval.with_max_tokens(budget);
    }

    let context = engine.retrieve(question, &retrieval).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&context)?);
    } else {
        print_context(&context);
    }

    let stats = cache.stats();
    tracing::debug!(
        "Cache: {} hits, {} misses ({:.0}% hit rate)",
        stats.hits,
        stats.misses,
        stats.hit_rate * 100.0
    );

    Ok(())
}

fn print_context(context: &RetrievalContext) {
    if context.chunks.is_empty() {
        println!("No matching chunks for: {}", context.query);
        return;
    }

    println!(
        "✓ {} chunks, {} tokens ({})\n",
        context.chunks.len(),
        context.total_tokens,
        context.strategy_tag
    );
    println!("{}\n", context.context_text);
    println!("Citations:");
    for (i, citation) in context.citations.iter().enumerate() {
        println!(
            "  [{}] {} #{} (score {:.3})",
            i + 1,
            citation.document_title,
            citation.chunk_index,
            citation.relevance_score
        );
        println!("      {}", preview(&citation.excerpt, 100));
    }
}

async fn cmd_cache(config: &Config, action: CacheAction) -> anyhow::Result<()> {
    let path = expand_path(&config.cache.path)?;
    let backend = Arc::new(
        SqliteCacheBackend::open(&path, config.cache.compression_threshold)
            .with_context(|| format!("Failed to open cache at {}", path.display()))?,
    );

    match action {
        CacheAction::Invalidate { document_id } => {
            let cache = RagCache::new(backend, config.cache_settings()?);
            let removed = cache.invalidate_by_document(&document_id).await;
            println!("✓ Removed {} cache entries for {}", removed, document_id);
        }
        CacheAction::Purge => {
            let removed = backend.purge_expired().await?;
            println!("✓ Purged {} expired entries from {}", removed, path.display());
        }
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Wrote default configuration to {}", path.display());
        }
        ConfigAction::Show { section } => {
            let config = load_config(config_path, None)?;
            let value = serde_json::to_value(&config)?;

            let shown = match section {
                Some(section) => match value.get(&section) {
                    Some(part) => part.clone(),
                    None => bail!("Unknown config section: {}", section),
                },
                None => value,
            };
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Path => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };
            println!("{}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> anyhow::Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'ragline config init' to create one."
        );
        if profile.is_some() {
            bail!("Cannot apply a profile without a config file");
        }
        return Ok(Config::load_or_default(&path)?);
    }

    let config = match profile {
        Some(profile) => Config::load_with_profile(&path, &profile)?,
        None => Config::load(&path)?,
    };
    Ok(config)
}

fn build_provider(config: &Config) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match config.embedding.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.embedding.dimension))),
        #[cfg(feature = "local-models")]
        "fastembed" => Ok(Arc::new(ragline::embedding::FastEmbedProvider::new(
            &config.embedding.model,
        )?)),
        #[cfg(not(feature = "local-models"))]
        "fastembed" => bail!("The fastembed provider requires the `local-models` feature"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(feature = "local-models")]
fn build_reranker(config: &Config) -> anyhow::Result<Option<Arc<dyn ragline::retrieval::Reranker>>> {
    let reranker = ragline::retrieval::FastEmbedReranker::new(&config.retrieval.reranker_model)?;
    Ok(Some(Arc::new(reranker)))
}

#[cfg(not(feature = "local-models"))]
fn build_reranker(_config: &Config) -> anyhow::Result<Option<Arc<dyn ragline::retrieval::Reranker>>> {
    tracing::warn!("Reranking requires the `local-models` feature");
    Ok(None)
}

fn build_cache(config: &Config) -> anyhow::Result<Arc<RagCache>> {
    let settings = config.cache_settings()?;
    let cache = match config.cache.backend.as_str() {
        "sqlite" => {
            let path = expand_path(&config.cache.path)?;
            let backend = SqliteCacheBackend::open(&path, config.cache.compression_threshold)
                .with_context(|| format!("Failed to open cache at {}", path.display()))?;
            RagCache::new(Arc::new(backend), settings)
        }
        _ => RagCache::new(Arc::new(ragline::cache::MemoryCacheBackend::new()), settings),
    };
    Ok(Arc::new(cache))
}

/// Document id for a file: its path as given
fn document_id(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}

fn expand_path(path: &Path) -> anyhow::Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid path encoding: {:?}", path))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir().context("Cannot determine home directory")?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
