//! Configuration loading for the memory store.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/agent-memory/config.toml.

use config::{Config, Environment, File};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::MemoryError;
use crate::provider::ProviderKind;

/// Embedding cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// File name of the cache, relative to `data_dir`
    pub file_name: String,

    /// Maximum number of cached vectors. Least recently used entries are
    /// evicted beyond this bound.
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            file_name: "embedding_cache.json".to_string(),
            max_entries: 100_000,
        }
    }
}

/// Vector store backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackend {
    /// usearch HNSW index with RocksDB record storage (default)
    #[default]
    Hnsw,
    /// Exact in-memory scan, nothing persisted
    Flat,
}

/// Vector store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSettings {
    pub backend: VectorBackend,

    /// Index directory (default: `{data_dir}/vectors`)
    pub index_dir: Option<String>,

    /// HNSW connections per layer (M)
    pub connectivity: usize,

    /// Build-time search depth (ef_construction)
    pub expansion_add: usize,

    /// Query-time search depth (ef_search)
    pub expansion_search: usize,

    /// Slots reserved when the index is created; grows by doubling.
    pub initial_capacity: usize,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            backend: VectorBackend::default(),
            index_dir: None,
            connectivity: 16,
            expansion_add: 200,
            expansion_search: 100,
            initial_capacity: 1024,
        }
    }
}

/// Local (in-process) embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalEmbeddingSettings {
    /// HuggingFace repository of the sentence-transformer model
    pub repo_id: String,

    /// Where model files are cached (default: platform cache dir)
    pub model_dir: Option<String>,
}

impl Default for LocalEmbeddingSettings {
    fn default() -> Self {
        Self {
            repo_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            model_dir: None,
        }
    }
}

/// Hosted embedding API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudEmbeddingSettings {
    /// Model name (e.g., "gemini-embedding-001")
    pub model: String,

    /// API base URL
    pub base_url: String,

    /// Environment variable holding the API key.
    /// The key itself is never stored in the config file.
    pub api_key_env: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for CloudEmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "gemini-embedding-001".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key_env: "GOOGLE_API_KEY".to_string(),
            timeout_secs: 20,
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Provider used when a caller does not choose one
    pub default_provider: ProviderKind,
    pub local: LocalEmbeddingSettings,
    pub cloud: CloudEmbeddingSettings,
}

/// Search defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Maximum number of results
    pub limit: usize,

    /// Minimum similarity (1 - cosine distance) for a result to be kept
    pub threshold: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            limit: 5,
            threshold: 0.3,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding the cache file and vector index
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub vector: VectorSettings,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub search: SearchSettings,
}

fn default_data_dir() -> String {
    ProjectDirs::from("", "", "agent-memory")
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            cache: CacheSettings::default(),
            vector: VectorSettings::default(),
            embedding: EmbeddingSettings::default(),
            search: SearchSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/agent-memory/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (MEMORY_*, `__` between nested keys)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, MemoryError> {
        let config_dir = ProjectDirs::from("", "", "agent-memory")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("data_dir", default_data_dir())
            .map_err(|e| MemoryError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| MemoryError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: MEMORY_LOG_LEVEL, MEMORY_CACHE__MAX_ENTRIES,
        // MEMORY_EMBEDDING__CLOUD__MODEL, etc.
        builder = builder.add_source(
            Environment::with_prefix("MEMORY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| MemoryError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| MemoryError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if !(-1.0..=1.0).contains(&self.search.threshold) {
            return Err(MemoryError::Config(format!(
                "search.threshold must be -1.0..=1.0, got {}",
                self.search.threshold
            )));
        }
        if self.search.limit == 0 {
            return Err(MemoryError::Config("search.limit must be > 0".to_string()));
        }
        if self.cache.max_entries == 0 {
            return Err(MemoryError::Config(
                "cache.max_entries must be > 0".to_string(),
            ));
        }
        if self.embedding.cloud.timeout_secs == 0 {
            return Err(MemoryError::Config(
                "embedding.cloud.timeout_secs must be > 0".to_string(),
            ));
        }
        if self.vector.initial_capacity == 0 {
            return Err(MemoryError::Config(
                "vector.initial_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Expand ~ in data_dir to the home directory
    pub fn expanded_data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    /// Full path of the embedding cache file
    pub fn cache_path(&self) -> PathBuf {
        self.expanded_data_dir().join(&self.cache.file_name)
    }

    /// Directory of the vector index and record database
    pub fn vector_index_dir(&self) -> PathBuf {
        match &self.vector.index_dir {
            Some(dir) => expand_home(dir),
            None => self.expanded_data_dir().join("vectors"),
        }
    }

    /// Directory for downloaded local model files, if overridden
    pub fn model_dir(&self) -> Option<PathBuf> {
        self.embedding.local.model_dir.as_deref().map(expand_home)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.search.limit, 5);
        assert!((settings.search.threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(settings.embedding.default_provider, ProviderKind::Cloud);
        assert_eq!(settings.embedding.cloud.api_key_env, "GOOGLE_API_KEY");
        assert_eq!(settings.vector.backend, VectorBackend::Hnsw);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_with_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.cache.file_name, "embedding_cache.json");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
data_dir = "/tmp/memory-test"

[cache]
max_entries = 10

[embedding]
default_provider = "local"

[search]
threshold = 0.5
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(settings.data_dir, "/tmp/memory-test");
        assert_eq!(settings.cache.max_entries, 10);
        assert_eq!(settings.cache.file_name, "embedding_cache.json");
        assert_eq!(settings.embedding.default_provider, ProviderKind::Local);
        assert!((settings.search.threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(settings.search.limit, 5);
    }

    #[test]
    fn test_paths() {
        let settings = Settings {
            data_dir: "/var/lib/memory".to_string(),
            ..Default::default()
        };
        assert_eq!(
            settings.cache_path(),
            PathBuf::from("/var/lib/memory/embedding_cache.json")
        );
        assert_eq!(
            settings.vector_index_dir(),
            PathBuf::from("/var/lib/memory/vectors")
        );
        assert!(settings.model_dir().is_none());
    }

    #[test]
    fn test_tilde_expansion() {
        let settings = Settings {
            data_dir: "~/memory".to_string(),
            ..Default::default()
        };
        assert!(!settings.expanded_data_dir().starts_with("~"));
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        settings.search.threshold = 1.5;
        assert!(settings.validate().is_err());

        settings.search.threshold = -1.0;
        assert!(settings.validate().is_ok());

        settings.cache.max_entries = 0;
        assert!(settings.validate().is_err());

        settings.cache.max_entries = 1;
        settings.embedding.cloud.timeout_secs = 0;
        assert!(settings.validate().is_err());
    }
}
