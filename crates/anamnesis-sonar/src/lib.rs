// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Perplexity Sonar provider adapter for the Anamnesis memory engine.
//!
//! This crate implements [`ProviderAdapter`] for the Sonar chat completions
//! API. The memory engine uses it as the extraction oracle: a single-shot,
//! low-temperature completion that turns a conversation turn into a JSON
//! array of entities.

pub mod client;
pub mod types;

use async_trait::async_trait;
use tracing::{debug, info};

use anamnesis_config::model::SonarConfig;
use anamnesis_core::{
    Adapter, AdapterType, AnamnesisError, CompletionRequest, CompletionResponse, HealthStatus,
    ProviderAdapter,
};

use crate::client::SonarClient;
use crate::types::{ApiChatMessage, ChatCompletionRequest};

/// Sonar provider implementing [`ProviderAdapter`].
///
/// API key resolution order: config -> `PERPLEXITY_API_KEY` env var -> error.
pub struct SonarProvider {
    client: SonarClient,
}

impl SonarProvider {
    /// Creates a new Sonar provider from the given configuration.
    ///
    /// # API Key Resolution
    /// 1. `config.sonar.api_key` if set
    /// 2. `PERPLEXITY_API_KEY` environment variable
    /// 3. Returns error if neither is available
    pub fn new(config: &SonarConfig) -> Result<Self, AnamnesisError> {
        let api_key = resolve_api_key(&config.api_key)?;
        let client = SonarClient::new(
            api_key,
            config.base_url.clone(),
            config.timeout_secs,
            config.max_retries,
        )?;

        info!(model = config.extraction_model, "Sonar provider initialized");

        Ok(Self { client })
    }

    /// Creates a provider with an existing client (for testing).
    #[cfg(test)]
    fn with_client(client: SonarClient) -> Self {
        Self { client }
    }

    /// Converts a core [`CompletionRequest`] to the Sonar wire format.
    fn to_chat_request(request: &CompletionRequest) -> ChatCompletionRequest {
        let messages = request
            .messages
            .iter()
            .map(|m| ApiChatMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect();

        ChatCompletionRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl Adapter for SonarProvider {
    fn name(&self) -> &str {
        "sonar"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, AnamnesisError> {
        // A full check would make a lightweight API call, but we avoid
        // consuming tokens on health checks.
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), AnamnesisError> {
        debug!("Sonar provider shutting down");
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for SonarProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AnamnesisError> {
        let api_request = Self::to_chat_request(&request);
        let response = self.client.chat_completion(&api_request).await?;

        let text = response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .unwrap_or_default();

        Ok(CompletionResponse {
            text,
            model: Some(response.model),
        })
    }
}

/// Resolves the API key from config or environment.
fn resolve_api_key(config_key: &Option<String>) -> Result<String, AnamnesisError> {
    if let Some(key) = config_key
        && !key.is_empty()
    {
        return Ok(key.clone());
    }

    std::env::var("PERPLEXITY_API_KEY").map_err(|_| {
        AnamnesisError::Config(
            "Sonar API key not found. Set sonar.api_key in config or PERPLEXITY_API_KEY environment variable.".into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anamnesis_core::{ChatMessage, ChatRole};
    use serial_test::serial;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn resolve_api_key_from_config() {
        let result = resolve_api_key(&Some("pplx-test-123".into()));
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "pplx-test-123");
    }

    #[test]
    #[serial]
    fn resolve_api_key_none_falls_back_to_env() {
        // SAFETY: test-only env mutation. Tests using env vars must not run in parallel.
        unsafe { std::env::set_var("PERPLEXITY_API_KEY", "pplx-env-456") };
        let result = resolve_api_key(&None);
        unsafe { std::env::remove_var("PERPLEXITY_API_KEY") };

        assert_eq!(result.unwrap(), "pplx-env-456");
    }

    #[test]
    #[serial]
    fn resolve_api_key_empty_config_and_no_env_errors() {
        // SAFETY: test-only env mutation. Tests using env vars must not run in parallel.
        unsafe { std::env::remove_var("PERPLEXITY_API_KEY") };
        let result = resolve_api_key(&Some("".into()));

        let err = result.unwrap_err().to_string();
        assert!(err.contains("API key not found"), "got: {err}");
    }

    #[test]
    fn to_chat_request_conversion() {
        let request = CompletionRequest {
            model: "sonar-pro".into(),
            messages: vec![
                ChatMessage {
                    role: ChatRole::System,
                    content: "Extract entities.".into(),
                },
                ChatMessage {
                    role: ChatRole::User,
                    content: "I take Lisinopril.".into(),
                },
            ],
            max_tokens: 1024,
            temperature: 0.1,
        };

        let api_req = SonarProvider::to_chat_request(&request);
        assert_eq!(api_req.model, "sonar-pro");
        assert_eq!(api_req.max_tokens, 1024);
        assert!((api_req.temperature - 0.1).abs() < 1e-6);
        assert_eq!(api_req.messages.len(), 2);
        assert_eq!(api_req.messages[0].role, "system");
        assert_eq!(api_req.messages[1].role, "user");
        assert_eq!(api_req.messages[1].content, "I take Lisinopril.");
    }

    #[test]
    fn adapter_metadata() {
        let client = SonarClient::new(
            "test-key".into(),
            "https://api.perplexity.ai".into(),
            30,
            1,
        )
        .unwrap();
        let provider = SonarProvider::with_client(client);

        assert_eq!(provider.name(), "sonar");
        assert_eq!(provider.adapter_type(), AdapterType::Provider);
    }

    #[tokio::test]
    async fn complete_extracts_first_choice_text() {
        let server = MockServer::start().await;

        let body = serde_json::json!({
            "id": "resp_complete",
            "model": "sonar-pro",
            "choices": [{
                "index": 0,
                "finish_reason": "stop",
                "message": {
                    "role": "assistant",
                    "content": "[{\"entityType\": \"medication\", \"entityName\": \"Lisinopril\"}]"
                }
            }]
        });

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({"model": "sonar-pro"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let client = SonarClient::new("test-key".into(), server.uri(), 30, 0).unwrap();
        let provider = SonarProvider::with_client(client);

        let response = provider
            .complete(CompletionRequest {
                model: "sonar-pro".into(),
                messages: vec![ChatMessage {
                    role: ChatRole::User,
                    content: "User: I take Lisinopril.\n\nAssistant: Noted.".into(),
                }],
                max_tokens: 1024,
                temperature: 0.1,
            })
            .await
            .unwrap();

        assert!(response.text.contains("Lisinopril"));
        assert_eq!(response.model.as_deref(), Some("sonar-pro"));
    }

    #[tokio::test]
    async fn complete_with_no_choices_returns_empty_text() {
        let server = MockServer::start().await;

        let body = serde_json::json!({
            "id": "resp_empty",
            "model": "sonar-pro",
            "choices": []
        });

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let client = SonarClient::new("test-key".into(), server.uri(), 30, 0).unwrap();
        let provider = SonarProvider::with_client(client);

        let response = provider
            .complete(CompletionRequest {
                model: "sonar-pro".into(),
                messages: vec![],
                max_tokens: 16,
                temperature: 0.1,
            })
            .await
            .unwrap();

        assert!(response.text.is_empty());
    }
}
