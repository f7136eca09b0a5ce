//! Assistant client factory.
//!
//! This module creates assistant clients from application configuration.
//! Secrets are resolved by the caller and passed in explicitly.

use crate::client::AssistantClient;
use crate::providers::{OpenAiAssistantClient, ScriptedClient};
use aide_core::config::AssistantSettings;
use aide_core::{AppError, AppResult};
use std::sync::Arc;

/// Create an assistant client based on the configured provider.
///
/// # Arguments
/// * `settings` - Assistant section of the configuration
/// * `api_key` - API key for providers that require one
///
/// # Errors
/// Returns error if:
/// - Provider is unknown
/// - A hosted provider has no API key
pub fn create_client(
    settings: &AssistantSettings,
    api_key: Option<String>,
) -> AppResult<Arc<dyn AssistantClient>> {
    match settings.provider.to_lowercase().as_str() {
        "openai" => {
            let api_key = api_key.ok_or_else(|| {
                AppError::Config(format!(
                    "OpenAI provider requires an API key (set {} or AIDE_API_KEY)",
                    settings.api_key_env
                ))
            })?;
            let client = match &settings.endpoint {
                Some(endpoint) => OpenAiAssistantClient::with_base_url(endpoint.as_str(), api_key),
                None => OpenAiAssistantClient::new(api_key),
            };
            Ok(Arc::new(client))
        }
        "scripted" => Ok(Arc::new(ScriptedClient::new())),
        _ => Err(AppError::Config(format!(
            "Unknown assistant provider: '{}'. Supported providers: openai, scripted",
            settings.provider
        ))),
    }
}
