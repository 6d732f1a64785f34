// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the Sonar chat completions API.
//!
//! Provides [`SonarClient`] which handles request construction,
//! authentication, and transient error retry.

use std::time::Duration;

use anamnesis_core::AnamnesisError;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, warn};

use crate::types::{ApiErrorResponse, ChatCompletionRequest, ChatCompletionResponse};

/// HTTP client for Sonar API communication.
///
/// Manages authentication headers, connection pooling, and retry logic
/// for transient errors (429, 500, 502, 503).
#[derive(Debug, Clone)]
pub struct SonarClient {
    client: reqwest::Client,
    completions_url: String,
    max_retries: u32,
}

impl SonarClient {
    /// Creates a new Sonar API client.
    ///
    /// # Arguments
    /// * `api_key` - Perplexity API key for bearer authentication
    /// * `base_url` - API base URL (e.g., "https://api.perplexity.ai")
    /// * `timeout_secs` - Per-request timeout
    /// * `max_retries` - Number of retries after a transient error
    pub fn new(
        api_key: String,
        base_url: String,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self, AnamnesisError> {
        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {api_key}");
        headers.insert(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|e| {
                AnamnesisError::Config(format!("invalid API key header value: {e}"))
            })?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AnamnesisError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            completions_url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            max_retries,
        })
    }

    /// Sends a chat completion request and returns the full response.
    ///
    /// On transient errors (429, 500, 502, 503), retries after a 1-second
    /// delay, up to `max_retries` times.
    pub async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, AnamnesisError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                warn!(attempt, "retrying completion request after transient error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            let response = self
                .client
                .post(&self.completions_url)
                .json(request)
                .send()
                .await
                .map_err(|e| AnamnesisError::Provider {
                    message: format!("HTTP request failed: {e}"),
                    source: Some(Box::new(e)),
                })?;

            let status = response.status();
            debug!(status = %status, attempt, "completion response received");

            if status.is_success() {
                let body = response.text().await.map_err(|e| AnamnesisError::Provider {
                    message: format!("failed to read response body: {e}"),
                    source: Some(Box::new(e)),
                })?;
                let completion: ChatCompletionResponse =
                    serde_json::from_str(&body).map_err(|e| AnamnesisError::Provider {
                        message: format!("failed to parse API response: {e}"),
                        source: Some(Box::new(e)),
                    })?;
                return Ok(completion);
            }

            if is_transient_error(status) && attempt < self.max_retries {
                let body = response.text().await.unwrap_or_default();
                warn!(status = %status, body = %body, "transient error, will retry");
                last_error = Some(AnamnesisError::Provider {
                    message: format!("API returned {status}: {body}"),
                    source: None,
                });
                continue;
            }

            // Non-transient error or exhausted retries.
            let body = response.text().await.unwrap_or_default();
            let error_msg = if let Ok(api_err) = serde_json::from_str::<ApiErrorResponse>(&body) {
                format!(
                    "Sonar API error ({}): {}",
                    api_err.error.type_, api_err.error.message
                )
            } else {
                format!("API returned {status}: {body}")
            };
            return Err(AnamnesisError::Provider {
                message: error_msg,
                source: None,
            });
        }

        Err(last_error.unwrap_or_else(|| AnamnesisError::Provider {
            message: "completion request failed after retries".into(),
            source: None,
        }))
    }
}

/// Returns true for HTTP status codes that indicate transient errors worth retrying.
fn is_transient_error(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503)
}
