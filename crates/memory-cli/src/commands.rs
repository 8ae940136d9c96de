//! Command implementations for the memory CLI.
//!
//! `build_service` is the single place where the cache, providers, vector
//! store and service are constructed. Every command builds them once, runs,
//! and flushes the cache before exiting.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tracing::{info, warn};

use memory_embeddings::{
    CachedEmbedder, EmbeddingCache, GeminiConfig, GeminiEmbedder, LocalEmbedder, ModelFiles,
};
use memory_service::{MemoryService, NewMemory, SearchOptions};
use memory_types::{Metadata, MetadataFilter, Settings, VectorBackend};
use memory_vector::{FlatStore, HnswConfig, HnswStore, VectorStore};

use crate::cli::{Cli, Commands};

/// Objects built once per process.
pub struct Runtime {
    pub settings: Settings,
    pub cache: Arc<EmbeddingCache>,
    pub embedder: Arc<CachedEmbedder>,
    pub service: MemoryService,
}

impl Runtime {
    /// Flush the embedding cache on the calling thread.
    pub fn shutdown(&self) {
        match self.cache.flush_now() {
            Ok(true) => info!(path = ?self.cache.path(), "Embedding cache flushed"),
            Ok(false) => {}
            Err(e) => warn!(path = ?self.cache.path(), error = %e, "Final cache flush failed"),
        }
    }
}

/// Apply CLI flags on top of loaded settings (highest precedence).
pub fn apply_overrides(settings: &mut Settings, cli: &Cli) {
    if let Some(log_level) = &cli.log_level {
        settings.log_level = log_level.clone();
    }
    if let Some(data_dir) = &cli.data_dir {
        settings.data_dir = data_dir.clone();
    }
}

/// Initialize logging to stderr. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Construct cache, providers, vector store and service from settings.
pub fn build_service(settings: &Settings) -> Result<Runtime> {
    let cache_path = settings.cache_path();
    let cache = Arc::new(
        EmbeddingCache::open(&cache_path, settings.cache.max_entries)
            .with_context(|| format!("Failed to open embedding cache at {}", cache_path.display()))?,
    );

    let model_dir = settings.model_dir();
    let local = LocalEmbedder::new(ModelFiles::with_optional_root(
        model_dir.as_deref(),
        &settings.embedding.local.repo_id,
    ));
    let cloud = GeminiEmbedder::new(GeminiConfig::from_settings(&settings.embedding.cloud))
        .context("Failed to build cloud embedding client")?;

    let embedder = Arc::new(
        CachedEmbedder::new(Arc::clone(&cache))
            .with_provider(Arc::new(local))
            .with_provider(Arc::new(cloud)),
    );

    let store: Arc<dyn VectorStore> = match settings.vector.backend {
        VectorBackend::Hnsw => {
            let index_dir = settings.vector_index_dir();
            let config = HnswConfig::from_settings(&settings.vector, &index_dir);
            Arc::new(
                HnswStore::open(config)
                    .with_context(|| format!("Failed to open vector store at {}", index_dir.display()))?,
            )
        }
        VectorBackend::Flat => {
            warn!("Flat vector backend selected; memories are not persisted");
            Arc::new(FlatStore::new())
        }
    };

    info!(
        data_dir = %settings.data_dir,
        backend = ?settings.vector.backend,
        default_provider = %settings.embedding.default_provider,
        "Memory service ready"
    );

    Ok(Runtime {
        settings: settings.clone(),
        cache,
        embedder: Arc::clone(&embedder),
        service: MemoryService::new(embedder, store),
    })
}

/// Load settings, initialize logging and execute one command.
pub async fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    apply_overrides(&mut settings, &cli);
    settings.validate().context("Invalid configuration")?;
    init_logging(&settings.log_level)?;

    let runtime = build_service(&settings)?;
    let result = execute(&runtime, cli.command).await;
    runtime.shutdown();

    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Execute a command, returning its JSON output.
pub async fn execute(runtime: &Runtime, command: Commands) -> Result<Value> {
    let settings = &runtime.settings;
    let service = &runtime.service;

    match command {
        Commands::Store {
            content,
            id,
            metadata,
            provider,
        } => {
            let mut memory = NewMemory::new(content);
            if let Some(id) = id {
                memory = memory.with_id(id);
            }
            if let Some(raw) = metadata {
                memory = memory.with_metadata(parse_metadata(&raw)?);
            }
            let provider = provider.unwrap_or(settings.embedding.default_provider);
            let id = service
                .store(memory, provider)
                .await
                .context("Failed to store memory")?;
            Ok(json!({ "id": id }))
        }

        Commands::Search {
            query,
            limit,
            threshold,
            provider,
            filter,
        } => {
            let mut options = SearchOptions::from_settings(&settings.search, settings.embedding.default_provider);
            if let Some(limit) = limit {
                options = options.with_limit(limit);
            }
            if let Some(threshold) = threshold {
                if !threshold.is_finite() {
                    bail!("--threshold must be a finite number, got {threshold}");
                }
                options = options.with_threshold(threshold);
            }
            if let Some(provider) = provider {
                options = options.with_provider(provider);
            }
            if let Some(raw) = filter {
                options = options.with_filter(Some(
                    MetadataFilter::parse(&raw).context("Invalid --where filter")?,
                ));
            }

            let results = service
                .search(&query, &options)
                .await
                .context("Search failed")?;
            Ok(serde_json::to_value(results)?)
        }

        Commands::Delete { id } => {
            service.delete(&id).context("Failed to delete memory")?;
            Ok(json!({ "deleted": id }))
        }

        Commands::Count => {
            let count = service.count().context("Failed to count memories")?;
            Ok(json!({ "count": count }))
        }

        Commands::Clear { yes } => {
            if !yes {
                bail!("Refusing to delete every memory without --yes");
            }
            let removed = service.clear().context("Failed to clear memories")?;
            Ok(json!({ "removed": removed }))
        }

        Commands::CacheStats => Ok(json!({
            "cache": runtime.cache.stats(),
            "embedder": runtime.embedder.stats(),
        })),
    }
}

fn parse_metadata(raw: &str) -> Result<Metadata> {
    match serde_json::from_str::<Value>(raw).context("Invalid --metadata JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--metadata must be a JSON object, got {other}"),
    }
}
