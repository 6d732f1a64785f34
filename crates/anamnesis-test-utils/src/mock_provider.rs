// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock extraction-oracle adapter for deterministic testing.
//!
//! `MockProvider` implements `ProviderAdapter` with pre-configured
//! responses, enabling fast, CI-runnable tests without external API
//! calls. Every request is recorded for later inspection.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use anamnesis_core::types::{
    AdapterType, CompletionRequest, CompletionResponse, HealthStatus,
};
use anamnesis_core::{Adapter, AnamnesisError, ProviderAdapter};

/// A mock extraction oracle that returns pre-configured responses.
///
/// Responses are popped from a FIFO queue. When the queue is empty, an
/// empty extraction (`[]`) is returned.
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<String>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    delay: Option<Duration>,
    failing: bool,
}

impl MockProvider {
    /// Create a new mock provider with an empty response queue.
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            delay: None,
            failing: false,
        }
    }

    /// Create a mock provider pre-loaded with the given responses.
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Self::new()
        }
    }

    /// Create a mock provider whose every completion call fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    /// Delay every completion call, for timeout and backpressure tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Add a response to the end of the queue.
    pub async fn add_response(&self, text: String) {
        self.responses.lock().await.push_back(text);
    }

    /// Returns every request received so far, oldest first.
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    /// Pop the next response, or return the default.
    async fn next_response(&self) -> String {
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| "[]".to_string())
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for MockProvider {
    fn name(&self) -> &str {
        "mock-provider"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, AnamnesisError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), AnamnesisError> {
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, AnamnesisError> {
        self.requests.lock().await.push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(AnamnesisError::Provider {
                message: "mock provider failure".to_string(),
                source: None,
            });
        }

        let text = self.next_response().await;
        Ok(CompletionResponse {
            text,
            model: Some(request.model),
        })
    }
}
