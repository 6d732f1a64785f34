// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP embedding provider speaking the OpenAI embeddings wire shape.
//!
//! Targets any server exposing `POST /v1/embeddings` (llama.cpp,
//! text-embeddings-inference, OpenAI proper). Transient failures are
//! retried; callers absorb the final error at creation and retrieval
//! sites, so a down embedding server never fails a chat turn.

use std::time::Duration;

use anamnesis_config::model::EmbeddingConfig;
use anamnesis_core::types::{EmbeddingInput, EmbeddingOutput};
use anamnesis_core::{Adapter, AdapterType, AnamnesisError, EmbeddingAdapter, HealthStatus};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedding adapter backed by an OpenAI-compatible HTTP endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    embeddings_url: String,
    model: String,
    dimensions: usize,
    max_retries: u32,
}

impl HttpEmbedder {
    /// Creates a new HTTP embedder from configuration.
    ///
    /// An API key, when configured, is sent as a bearer Authorization
    /// header; local embedding servers typically need none.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, AnamnesisError> {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        if let Some(api_key) = &config.api_key
            && !api_key.is_empty()
        {
            let bearer = format!("Bearer {api_key}");
            headers.insert(
                reqwest::header::AUTHORIZATION,
                HeaderValue::from_str(&bearer).map_err(|e| {
                    AnamnesisError::Config(format!("invalid API key header value: {e}"))
                })?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnamnesisError::Embedding {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            embeddings_url: format!("{}/v1/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimensions: config.dimensions,
            max_retries: config.max_retries,
        })
    }

    /// POST the embedding request once and parse the response.
    async fn request_embeddings(
        &self,
        texts: &[String],
    ) -> Result<reqwest::Response, AnamnesisError> {
        self.client
            .post(&self.embeddings_url)
            .json(&EmbeddingsRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| AnamnesisError::Embedding {
                message: format!("HTTP request failed: {e}"),
                source: Some(Box::new(e)),
            })
    }
}

#[async_trait]
impl Adapter for HttpEmbedder {
    fn name(&self) -> &str {
        "embedding-http"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, AnamnesisError> {
        // Embedding servers expose no cheap probe endpoint; a real
        // request would burn compute, so report healthy and let the
        // first embed call surface problems.
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), AnamnesisError> {
        debug!("HTTP embedder shutdown");
        Ok(())
    }
}

#[async_trait]
impl EmbeddingAdapter for HttpEmbedder {
    /// Generates embeddings for the given input.
    ///
    /// On transient errors (429, 500, 502, 503), retries after a
    /// 1-second delay, up to `max_retries` times. Response rows are
    /// sorted by index so vectors always come back in input order.
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, AnamnesisError> {
        if input.texts.is_empty() {
            return Ok(EmbeddingOutput {
                embeddings: Vec::new(),
                dimensions: self.dimensions,
            });
        }

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                warn!(attempt, "retrying embedding request after transient error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            let response = self.request_embeddings(&input.texts).await?;
            let status = response.status();
            debug!(status = %status, attempt, "embedding response received");

            if status.is_success() {
                let body: EmbeddingsResponse =
                    response.json().await.map_err(|e| AnamnesisError::Embedding {
                        message: format!("failed to parse embedding response: {e}"),
                        source: Some(Box::new(e)),
                    })?;

                let mut data = body.data;
                data.sort_by_key(|row| row.index);
                if data.len() != input.texts.len() {
                    return Err(AnamnesisError::Embedding {
                        message: format!(
                            "embedding server returned {} vectors for {} inputs",
                            data.len(),
                            input.texts.len()
                        ),
                        source: None,
                    });
                }

                let embeddings: Vec<Vec<f32>> =
                    data.into_iter().map(|row| row.embedding).collect();
                let dimensions = embeddings.first().map_or(self.dimensions, Vec::len);
                return Ok(EmbeddingOutput {
                    embeddings,
                    dimensions,
                });
            }

            if is_transient_error(status) && attempt < self.max_retries {
                let body = response.text().await.unwrap_or_default();
                warn!(status = %status, body = %body, "transient error, will retry");
                last_error = Some(AnamnesisError::Embedding {
                    message: format!("embedding server returned {status}: {body}"),
                    source: None,
                });
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(AnamnesisError::Embedding {
                message: format!("embedding server returned {status}: {body}"),
                source: None,
            });
        }

        Err(last_error.unwrap_or_else(|| AnamnesisError::Embedding {
            message: "embedding request failed after retries".into(),
            source: None,
        }))
    }
}

/// Returns true for HTTP status codes that indicate transient errors worth retrying.
fn is_transient_error(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: base_url.to_string(),
            model: "all-MiniLM-L6-v2".to_string(),
            api_key: None,
            dimensions: 3,
            timeout_secs: 30,
            max_retries: 1,
        }
    }

    fn input(texts: &[&str]) -> EmbeddingInput {
        EmbeddingInput {
            texts: texts.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn embed_single_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(serde_json::json!({
                "model": "all-MiniLM-L6-v2",
                "input": ["user: hello"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3]}]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&test_config(&server.uri())).unwrap();
        let output = embedder.embed(input(&["user: hello"])).await.unwrap();
        assert_eq!(output.embeddings, vec![vec![0.1, 0.2, 0.3]]);
        assert_eq!(output.dimensions, 3);
    }

    #[tokio::test]
    async fn embed_sorts_rows_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                    {"index": 0, "embedding": [1.0, 0.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&test_config(&server.uri())).unwrap();
        let output = embedder.embed(input(&["first", "second"])).await.unwrap();
        assert_eq!(output.embeddings[0], vec![1.0, 0.0, 0.0]);
        assert_eq!(output.embeddings[1], vec![0.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn embed_rejects_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3]}]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&test_config(&server.uri())).unwrap();
        let result = embedder.embed(input(&["first", "second"])).await;
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("1 vectors for 2 inputs"), "got: {err}");
    }

    #[tokio::test]
    async fn embed_retries_on_500() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.5, 0.5, 0.0]}]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&test_config(&server.uri())).unwrap();
        let output = embedder.embed(input(&["retry me"])).await.unwrap();
        assert_eq!(output.embeddings.len(), 1);
    }

    #[tokio::test]
    async fn embed_fails_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&test_config(&server.uri())).unwrap();
        let result = embedder.embed(input(&["missing"])).await;
        assert!(matches!(result, Err(AnamnesisError::Embedding { .. })));
    }

    #[tokio::test]
    async fn embed_sends_bearer_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer embed-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3]}]
            })))
            .mount(&server)
            .await;

        let mut config = test_config(&server.uri());
        config.api_key = Some("embed-key".to_string());
        let embedder = HttpEmbedder::new(&config).unwrap();
        let result = embedder.embed(input(&["authed"])).await;
        assert!(result.is_ok(), "bearer header should match: {result:?}");
    }

    #[tokio::test]
    async fn embed_empty_input_skips_http() {
        // No server at all; an empty input must not hit the network.
        let embedder = HttpEmbedder::new(&test_config("http://127.0.0.1:1")).unwrap();
        let output = embedder.embed(input(&[])).await.unwrap();
        assert!(output.embeddings.is_empty());
        assert_eq!(output.dimensions, 3);
    }
}
