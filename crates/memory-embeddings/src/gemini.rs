//! Gemini `embedContent` client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use memory_types::{CloudEmbeddingSettings, ProviderKind};

use crate::error::EmbeddingError;
use crate::model::EmbeddingProvider;

/// Where the API key comes from.
#[derive(Debug, Clone)]
pub enum ApiKeySource {
    /// Read from this environment variable on every call
    Env(String),
    /// Fixed key supplied by the caller
    Fixed(SecretString),
}

impl ApiKeySource {
    fn resolve(&self) -> Result<SecretString, EmbeddingError> {
        let key = match self {
            Self::Env(var) => std::env::var(var).ok().map(SecretString::from),
            Self::Fixed(key) => Some(key.clone()),
        };
        key.filter(|k| !k.expose_secret().trim().is_empty())
            .ok_or_else(|| {
                let name = match self {
                    Self::Env(var) => var.as_str(),
                    Self::Fixed(_) => "API key",
                };
                EmbeddingError::Configuration(format!(
                    "{name} is missing. Set it in the environment or .env, or use the local provider"
                ))
            })
    }
}

/// Configuration for the Gemini embedding client.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API base URL (e.g., "https://generativelanguage.googleapis.com/v1beta")
    pub base_url: String,

    /// Model name without the `models/` prefix
    pub model: String,

    pub api_key: ApiKeySource,

    /// Request timeout
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self::from_settings(&CloudEmbeddingSettings::default())
    }
}

impl GeminiConfig {
    pub fn from_settings(settings: &CloudEmbeddingSettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            api_key: ApiKeySource::Env(settings.api_key_env.clone()),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = ApiKeySource::Fixed(SecretString::from(api_key.into()));
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Option<Embedding>,
}

#[derive(Deserialize)]
struct Embedding {
    #[serde(default)]
    values: Vec<f32>,
}

/// Hosted embedding provider. One HTTP request per call, no retries.
pub struct GeminiEmbedder {
    client: Client,
    config: GeminiConfig,
}

impl GeminiEmbedder {
    pub fn new(config: GeminiConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmbeddingError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:embedContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cloud
    }

    fn name(&self) -> &str {
        &self.config.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let api_key = self.config.api_key.resolve()?;

        let request = EmbedRequest {
            model: format!("models/{}", self.config.model),
            content: Content {
                parts: [Part { text }],
            },
        };

        debug!(model = %self.config.model, chars = text.len(), "Calling embedding API");

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", api_key.expose_secret())])
            .json(&request)
            .send()
            .await
            // The URL carries the key
            .map_err(|e| EmbeddingError::Network(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.without_url().to_string()))?;

        match body.embedding {
            Some(Embedding { values }) if !values.is_empty() => Ok(values),
            _ => Err(EmbeddingError::InvalidResponse(
                "response contained no embedding values".to_string(),
            )),
        }
    }
}
