//! OpenAI embedding provider (`POST /v1/embeddings`).

use super::with_retries;
use crate::embeddings::EmbeddingProvider;
use aide_core::config::EmbeddingSettings;
use aide_core::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
const EMBEDDING_ENDPOINT: &str = "/v1/embeddings";

/// Inputs per request; the API accepts more, this keeps bodies small.
const MAX_BATCH: usize = 256;

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    /// Sent only when configured explicitly
    requested_dimensions: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Native output size of the known embedding models.
fn native_dimensions(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

impl OpenAiProvider {
    pub fn new(settings: &EmbeddingSettings, api_key: String) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| AppError::Llm(format!("Failed to create HTTP client for OpenAI: {}", e)))?;

        let base_url = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            base_url,
            api_key,
            model: settings.model.clone(),
            dimensions: settings
                .dimensions
                .unwrap_or_else(|| native_dimensions(&settings.model)),
            requested_dimensions: settings.dimensions,
        })
    }

    #[instrument(skip(self, texts), fields(batch_size = texts.len()))]
    async fn request(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let url = format!("{}{}", self.base_url, EMBEDDING_ENDPOINT);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
                dimensions: self.requested_dimensions,
            })
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to send request to OpenAI: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ErrorEnvelope>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(AppError::Llm(format!("OpenAI API error ({}): {}", status, message)));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse OpenAI response: {}", e)))?;

        order_embeddings(body.data, texts.len())
    }
}

/// Place each returned vector at its input index.
fn order_embeddings(data: Vec<EmbeddingData>, expected: usize) -> AppResult<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(AppError::Llm(format!(
            "OpenAI returned {} embeddings for {} inputs",
            data.len(),
            expected
        )));
    }
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in data {
        match slots.get_mut(item.index) {
            Some(slot) => *slot = Some(item.embedding),
            None => {
                return Err(AppError::Llm(format!(
                    "OpenAI returned out-of-range embedding index {}",
                    item.index
                )))
            }
        }
    }
    slots
        .into_iter()
        .map(|slot| slot.ok_or_else(|| AppError::Llm("OpenAI omitted an embedding".to_string())))
        .collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip(self, texts), fields(batch_size = texts.len(), provider = "openai", model = %self.model))]
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH) {
            // The API rejects empty strings.
            let batch: Vec<String> = batch
                .iter()
                .map(|t| if t.is_empty() { " ".to_string() } else { t.clone() })
                .collect();
            embeddings.extend(with_retries("openai", || self.request(&batch)).await?);
        }
        debug!("Generated {} embeddings", embeddings.len());
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_follow_model() {
        let mut settings = EmbeddingSettings::default();
        let provider = OpenAiProvider::new(&settings, "sk".into()).unwrap();
        assert_eq!(provider.dimensions(), 1536);
        assert_eq!(provider.requested_dimensions, None);

        settings.model = "text-embedding-3-large".to_string();
        let provider = OpenAiProvider::new(&settings, "sk".into()).unwrap();
        assert_eq!(provider.dimensions(), 3072);

        settings.dimensions = Some(256);
        let provider = OpenAiProvider::new(&settings, "sk".into()).unwrap();
        assert_eq!(provider.dimensions(), 256);
        assert_eq!(provider.requested_dimensions, Some(256));
    }

    #[test]
    fn test_request_body_omits_unset_dimensions() {
        let input = vec!["a".to_string()];
        let body = serde_json::to_value(EmbeddingRequest {
            model: "text-embedding-3-small",
            input: &input,
            dimensions: None,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"model": "text-embedding-3-small", "input": ["a"]})
        );
    }

    #[test]
    fn test_order_embeddings_by_index() {
        let data = vec![
            EmbeddingData {
                index: 1,
                embedding: vec![2.0],
            },
            EmbeddingData {
                index: 0,
                embedding: vec![1.0],
            },
        ];
        assert_eq!(
            order_embeddings(data, 2).unwrap(),
            vec![vec![1.0], vec![2.0]]
        );
    }

    #[test]
    fn test_order_embeddings_rejects_gaps() {
        let data = vec![
            EmbeddingData {
                index: 0,
                embedding: vec![1.0],
            },
            EmbeddingData {
                index: 0,
                embedding: vec![1.0],
            },
        ];
        assert!(order_embeddings(data, 2).is_err());
    }
}
