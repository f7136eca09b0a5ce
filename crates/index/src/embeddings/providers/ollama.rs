//! Ollama Embedding Provider
//!
//! Embeds through a local Ollama server (`POST /api/embeddings`), one text
//! per request, with retries and a bounded request timeout.

use super::{with_retries, MAX_RETRIES};
use crate::embeddings::EmbeddingProvider;
use aide_core::config::EmbeddingSettings;
use aide_core::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Ollama API endpoint for embeddings
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const EMBEDDING_ENDPOINT: &str = "/api/embeddings";

/// Model used when the configured one is a hosted model name
const DEFAULT_MODEL: &str = "nomic-embed-text";
const DEFAULT_DIMENSIONS: usize = 768;

/// Ollama embedding provider using the local API
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl OllamaProvider {
    /// Create a provider and verify that the model answers.
    ///
    /// The endpoint comes from settings, then `OLLAMA_URL`, then the
    /// local default.
    pub async fn new(settings: &EmbeddingSettings) -> AppResult<Self> {
        let provider = Self::unverified(settings)?;
        provider.verify_connection().await?;
        Ok(provider)
    }

    fn unverified(settings: &EmbeddingSettings) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| AppError::Llm(format!("Failed to create HTTP client for Ollama: {}", e)))?;

        let base_url = settings
            .endpoint
            .clone()
            .or_else(|| std::env::var("OLLAMA_URL").ok())
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let model = if settings.model.starts_with("text-embedding-") {
            DEFAULT_MODEL.to_string()
        } else {
            settings.model.clone()
        };

        Ok(Self {
            client,
            base_url,
            model,
            dimensions: settings.dimensions.unwrap_or(DEFAULT_DIMENSIONS),
        })
    }

    #[instrument(skip(self), fields(model = %self.model))]
    async fn verify_connection(&self) -> AppResult<()> {
        debug!("Verifying Ollama connection at {}", self.base_url);

        match self.embed_one("test connection").await {
            Ok(_) => {
                debug!("Ollama connection verified, model '{}' ready", self.model);
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to Ollama: {}", e);
                Err(AppError::Llm(format!(
                    "Ollama not available at {}. Ensure Ollama is running and model '{}' is installed. Run: ollama pull {}",
                    self.base_url, self.model, self.model
                )))
            }
        }
    }

    async fn embed_one(&self, text: &str) -> AppResult<Vec<f32>> {
        with_retries("ollama", || self.embed_single(text)).await
    }

    /// Embed single text (no retries)
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    async fn embed_single(&self, text: &str) -> AppResult<Vec<f32>> {
        let url = format!("{}{}", self.base_url, EMBEDDING_ENDPOINT);

        let response = self
            .client
            .post(&url)
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to send request to Ollama: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ErrorResponse>(&error_text)
                .map(|e| e.error)
                .unwrap_or(error_text);
            return Err(AppError::Llm(format!("Ollama API error ({}): {}", status, message)));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse Ollama response: {}", e)))?;

        if body.embedding.len() != self.dimensions {
            return Err(AppError::Llm(format!(
                "Unexpected embedding dimensions: got {}, expected {}",
                body.embedding.len(),
                self.dimensions
            )));
        }

        Ok(body.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip(self, texts), fields(batch_size = texts.len(), provider = "ollama", model = %self.model))]
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        // Ollama's embeddings endpoint takes one prompt per request.
        let mut embeddings = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                warn!("Embedding empty text at index {} as a zero vector", i);
                embeddings.push(vec![0.0; self.dimensions]);
                continue;
            }
            embeddings.push(self.embed_one(text).await?);
        }
        debug!(
            "Embedded {} texts (up to {} attempts each)",
            embeddings.len(),
            MAX_RETRIES
        );
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EmbeddingSettings {
        EmbeddingSettings {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            endpoint: Some("http://127.0.0.1:11434/".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_settings_mapping() {
        let provider = OllamaProvider::unverified(&settings()).unwrap();
        assert_eq!(provider.base_url, "http://127.0.0.1:11434");
        assert_eq!(provider.model_name(), "nomic-embed-text");
        assert_eq!(provider.dimensions(), 768);
    }

    #[test]
    fn test_hosted_model_name_falls_back() {
        let mut config = settings();
        config.model = "text-embedding-3-small".to_string();
        let provider = OllamaProvider::unverified(&config).unwrap();
        assert_eq!(provider.model_name(), DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn test_empty_texts_skip_the_network() {
        // Port 9 (discard) is never an Ollama server; no request may be made.
        let mut config = settings();
        config.endpoint = Some("http://127.0.0.1:9".to_string());
        let provider = OllamaProvider::unverified(&config).unwrap();

        let vectors = provider
            .embed_batch(&["   ".to_string(), String::new()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.len() == 768));
    }

    #[tokio::test]
    async fn test_embed_against_local_server() {
        if !is_ollama_running().await {
            println!("Skipping test: Ollama not running");
            return;
        }

        let provider = OllamaProvider::new(&settings()).await.unwrap();
        let embedding = provider.embed("Hello, world!").await.unwrap();
        assert_eq!(embedding.len(), 768);
    }

    /// Helper to check if Ollama is running
    async fn is_ollama_running() -> bool {
        let client = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();

        let url = format!("{}/api/tags", DEFAULT_OLLAMA_URL);
        client.get(&url).send().await.is_ok()
    }
}
