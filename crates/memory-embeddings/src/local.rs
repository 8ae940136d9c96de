//! In-process embedding provider.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use memory_types::ProviderKind;

use crate::candle::CandleEmbedder;
use crate::error::EmbeddingError;
use crate::model::EmbeddingProvider;
use crate::model_files::ModelFiles;

/// Local sentence-transformer provider.
///
/// The model is loaded on the first `embed` call, not at construction, so a
/// process that only uses the cloud provider never touches model files.
pub struct LocalEmbedder {
    files: ModelFiles,
    name: String,
    model: OnceCell<Arc<CandleEmbedder>>,
}

impl LocalEmbedder {
    pub fn new(files: ModelFiles) -> Self {
        let name = files.model_name().to_string();
        Self {
            files,
            name,
            model: OnceCell::new(),
        }
    }

    async fn model(&self) -> Result<Arc<CandleEmbedder>, EmbeddingError> {
        self.model
            .get_or_try_init(|| async {
                let files = self.files.clone();
                let loaded = tokio::task::spawn_blocking(move || CandleEmbedder::load(&files))
                    .await
                    .map_err(|e| EmbeddingError::Task(e.to_string()))?;

                loaded.map(Arc::new).map_err(|e| {
                    EmbeddingError::ProviderUnavailable(format!(
                        "local model {} could not be loaded ({e}). \
                         The first run downloads it from HuggingFace; set \
                         embedding.local.model_dir to a directory holding {} \
                         or use the cloud provider",
                        self.files.repo_id,
                        crate::model_files::MODEL_FILES.join(", "),
                    ))
                })
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let model = self.model().await?;
        let text = text.to_owned();

        // Inference is CPU-bound
        let embedding = tokio::task::spawn_blocking(move || model.encode(&text))
            .await
            .map_err(|e| EmbeddingError::Task(e.to_string()))??;

        debug!(model = %self.name, dim = embedding.len(), "Local embedding computed");
        Ok(embedding)
    }
}
