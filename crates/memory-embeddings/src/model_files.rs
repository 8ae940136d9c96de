//! Local model files.
//!
//! Downloads sentence-transformer weights from HuggingFace Hub on first use
//! and keeps them in a per-repository directory.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::EmbeddingError;

/// Default model repository on HuggingFace
pub const DEFAULT_MODEL_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Required model files
pub const MODEL_FILES: &[&str] = &["config.json", "tokenizer.json", "model.safetensors"];

/// Where a model's files live on disk.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    /// Root directory shared by all models
    pub root: PathBuf,
    /// Model repository ID
    pub repo_id: String,
}

impl Default for ModelFiles {
    fn default() -> Self {
        Self {
            root: default_model_root(),
            repo_id: DEFAULT_MODEL_REPO.to_string(),
        }
    }
}

fn default_model_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("agent-memory")
        .join("models")
}

impl ModelFiles {
    pub fn new(root: impl Into<PathBuf>, repo_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            repo_id: repo_id.into(),
        }
    }

    /// Use the platform cache directory unless `root` overrides it.
    pub fn with_optional_root(root: Option<&Path>, repo_id: impl Into<String>) -> Self {
        Self::new(
            root.map(Path::to_path_buf).unwrap_or_else(default_model_root),
            repo_id,
        )
    }

    /// Directory holding this model's files
    pub fn model_dir(&self) -> PathBuf {
        self.root.join(self.repo_id.replace('/', "_"))
    }

    /// True when every required file is present locally
    pub fn is_complete(&self) -> bool {
        let dir = self.model_dir();
        MODEL_FILES.iter().all(|f| dir.join(f).exists())
    }

    /// Model name without the organisation prefix
    pub fn model_name(&self) -> &str {
        self.repo_id.rsplit('/').next().unwrap_or(&self.repo_id)
    }
}

/// Paths to model files
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

/// Get or download model files.
pub fn get_or_download_model(files: &ModelFiles) -> Result<ModelPaths, EmbeddingError> {
    let dir = files.model_dir();

    if files.is_complete() {
        debug!(path = ?dir, "Using cached model files");
    } else {
        info!(repo = %files.repo_id, "Downloading model files...");
        download_model_files(files)?;
    }

    Ok(ModelPaths {
        config: dir.join("config.json"),
        tokenizer: dir.join("tokenizer.json"),
        weights: dir.join("model.safetensors"),
    })
}

fn download_model_files(files: &ModelFiles) -> Result<(), EmbeddingError> {
    use hf_hub::api::sync::Api;

    let api = Api::new().map_err(|e| EmbeddingError::Download(e.to_string()))?;
    let repo = api.model(files.repo_id.clone());

    let dir = files.model_dir();
    std::fs::create_dir_all(&dir)?;

    for filename in MODEL_FILES {
        let source = repo
            .get(filename)
            .map_err(|e| EmbeddingError::Download(format!("{}: {}", filename, e)))?;

        let dest = dir.join(filename);
        std::fs::copy(&source, &dest)?;
        debug!(file = filename, dest = ?dest, "Downloaded");
    }

    Ok(())
}
