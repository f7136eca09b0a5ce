//! Embedding provider trait and factory.

use aide_core::config::EmbeddingSettings;
use aide_core::{AppError, AppResult};
use std::sync::Arc;

use super::providers::{mock::MockProvider, ollama::OllamaProvider, openai::OpenAiProvider};

/// Trait for embedding providers.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Get provider name (e.g., "mock", "openai", "ollama")
    fn provider_name(&self) -> &str;

    /// Get model identifier
    fn model_name(&self) -> &str;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Generate embeddings for multiple texts in a batch.
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    /// Generate embedding for a single text (convenience method).
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| AppError::Index("No embedding returned".to_string()))
    }
}

/// Create an embedding provider from settings.
///
/// `api_key` is only consulted by hosted providers.
pub async fn create_provider(
    settings: &EmbeddingSettings,
    api_key: Option<String>,
) -> AppResult<Arc<dyn EmbeddingProvider>> {
    match settings.provider.as_str() {
        "mock" => {
            let dimensions = settings.dimensions.unwrap_or(MockProvider::DEFAULT_DIMENSIONS);
            Ok(Arc::new(MockProvider::new(dimensions)))
        }

        "openai" => {
            let api_key = api_key.ok_or_else(|| {
                AppError::Config(format!(
                    "API key not found in environment variable: {}",
                    settings.api_key_env
                ))
            })?;
            Ok(Arc::new(OpenAiProvider::new(settings, api_key)?))
        }

        "ollama" => Ok(Arc::new(OllamaProvider::new(settings).await?)),

        _ => Err(AppError::Config(format!(
            "Unknown embedding provider: '{}'. Supported providers: mock, openai, ollama",
            settings.provider
        ))),
    }
}
