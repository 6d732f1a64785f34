// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sonar chat completions API request/response types.

use serde::{Deserialize, Serialize};

// --- Request types ---

/// A request to the Sonar chat completions API.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    /// Model identifier (e.g., "sonar-pro").
    pub model: String,

    /// Conversation messages, oldest first.
    pub messages: Vec<ApiChatMessage>,

    /// Maximum tokens to generate.
    pub max_tokens: u32,

    /// Sampling temperature. Extraction runs cold so the output stays
    /// parseable JSON.
    pub temperature: f32,
}

/// A single message in the chat completions format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiChatMessage {
    /// Role: "system", "user" or "assistant".
    pub role: String,

    /// Plain text content.
    pub content: String,
}

// --- Response types ---

/// A full response from the Sonar chat completions API.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    /// Response ID.
    pub id: String,
    /// Model that generated the response.
    pub model: String,
    /// Completion choices; Sonar returns exactly one.
    pub choices: Vec<ApiChoice>,
    /// Source URLs backing the answer, when web search ran.
    #[serde(default)]
    pub citations: Option<Vec<String>>,
    /// Structured search results backing the answer.
    #[serde(default)]
    pub search_results: Option<serde_json::Value>,
    /// Token usage statistics.
    #[serde(default)]
    pub usage: Option<ApiUsage>,
}

/// One completion choice within a response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiChoice {
    /// Choice index.
    pub index: u32,
    /// The generated message.
    pub message: ApiChatMessage,
    /// Reason the generation stopped.
    pub finish_reason: Option<String>,
}

/// Token usage statistics from the API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiUsage {
    /// Number of prompt tokens consumed.
    pub prompt_tokens: u32,
    /// Number of completion tokens generated.
    pub completion_tokens: u32,
    /// Total tokens billed.
    pub total_tokens: u32,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorDetail,
}

/// Error detail within an API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    /// Error type identifier.
    #[serde(rename = "type", default)]
    pub type_: String,
    /// Human-readable error message.
    pub message: String,
}
