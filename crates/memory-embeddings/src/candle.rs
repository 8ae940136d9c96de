//! Candle-based sentence encoder.
//!
//! Runs all-MiniLM-L6-v2 on the CPU and produces 384-dimensional,
//! unit-length vectors by mean pooling over non-padding tokens.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::error::EmbeddingError;
use crate::model::{normalize, ModelInfo};
use crate::model_files::{get_or_download_model, ModelFiles};

/// Embedding dimension for all-MiniLM-L6-v2
pub const EMBEDDING_DIM: usize = 384;

/// Maximum sequence length
pub const MAX_SEQ_LENGTH: usize = 256;

/// BERT sentence encoder. Blocking; call from `spawn_blocking`.
pub struct CandleEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    info: ModelInfo,
}

impl CandleEmbedder {
    /// Load the model, downloading its files if needed.
    pub fn load(files: &ModelFiles) -> Result<Self, EmbeddingError> {
        let paths = get_or_download_model(files)?;
        Self::load_from_paths(
            files.model_name(),
            &paths.config,
            &paths.tokenizer,
            &paths.weights,
        )
    }

    /// Load from explicit file paths
    pub fn load_from_paths(
        name: &str,
        config_path: &Path,
        tokenizer_path: &Path,
        weights_path: &Path,
    ) -> Result<Self, EmbeddingError> {
        info!(model = name, "Loading embedding model...");

        let device = Device::Cpu;

        let config_str = std::fs::read_to_string(config_path)?;
        let config: BertConfig = serde_json::from_str(&config_str)
            .map_err(|e| EmbeddingError::ModelNotFound(format!("Invalid config: {}", e)))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path.to_path_buf()], DType::F32, &device)?
        };
        let model = BertModel::load(vb, &config)?;

        info!(
            model = name,
            dim = EMBEDDING_DIM,
            max_seq = MAX_SEQ_LENGTH,
            "Model loaded"
        );

        Ok(Self {
            model,
            tokenizer,
            device,
            info: ModelInfo {
                name: name.to_string(),
                dimension: EMBEDDING_DIM,
                max_sequence_length: MAX_SEQ_LENGTH,
            },
        })
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    /// Encode one text.
    pub fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.encode_batch(&[text])?
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("model returned no rows".to_string()))
    }

    /// Encode several texts in one forward pass.
    pub fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(MAX_SEQ_LENGTH);

        let mut ids = Vec::with_capacity(texts.len() * seq_len);
        let mut mask = Vec::with_capacity(texts.len() * seq_len);
        for encoding in &encodings {
            let n = encoding.get_ids().len().min(seq_len);
            ids.extend_from_slice(&encoding.get_ids()[..n]);
            mask.extend_from_slice(&encoding.get_attention_mask()[..n]);
            // right-pad to the batch length
            ids.extend(std::iter::repeat(0).take(seq_len - n));
            mask.extend(std::iter::repeat(0).take(seq_len - n));
        }

        let shape = (texts.len(), seq_len);
        let input_ids = Tensor::from_vec(ids, shape, &self.device)?;
        let attention_mask = Tensor::from_vec(mask, shape, &self.device)?;
        let token_type_ids = Tensor::zeros_like(&input_ids)?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled = mean_pool(&hidden, &attention_mask)?;

        let rows: Vec<Vec<f32>> = pooled.to_vec2()?;
        debug!(count = rows.len(), "Encoded batch");
        Ok(rows.into_iter().map(normalize).collect())
    }
}

/// Average token vectors, ignoring padding positions.
fn mean_pool(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor, EmbeddingError> {
    let mask = attention_mask
        .unsqueeze(2)?
        .broadcast_as(hidden.shape())?
        .to_dtype(DType::F32)?;

    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
    Ok(summed.broadcast_div(&counts)?)
}
