// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! LLM-based entity extraction from conversation turns.
//!
//! Sends one completed turn to the extraction oracle and parses the
//! response defensively: code fences and surrounding prose are stripped,
//! non-array output is rejected, and invalid elements are skipped.

use std::sync::Arc;
use std::time::Duration;

use anamnesis_config::model::{MemoryConfig, SonarConfig};
use anamnesis_core::types::{ChatMessage, ChatRole, CompletionRequest};
use anamnesis_core::{AnamnesisError, ProviderAdapter};
use tracing::{debug, warn};

use crate::types::ExtractedEntity;

/// System prompt for entity extraction.
const EXTRACTION_PROMPT: &str = r#"Extract health-related entities from this conversation turn that would be useful to remember for future conversations. Output as JSON array.

For each entity:
- "entityType": One of: condition, medication, symptom, allergy, procedure, provider, lifestyle, preference, topic
- "entityName": The canonical name (e.g., "Lisinopril", "Lupus")
- "relationships": Array of objects linking this entity to others (e.g., {"type": "TREATS", "target": "Hypertension"})
- "metadata": Object of additional attributes (e.g., {"dosage": "10mg", "frequency": "daily"})

Only include entities that are:
1. Stated or confirmed by the user (not hypotheticals raised by the assistant)
2. Specific and factual
3. Likely to be relevant in future conversations

If no entities are present, return an empty array: []

Conversation turn:
{turn}

Output JSON array only, no explanation:"#;

/// Calls the extraction oracle for one conversation turn.
pub struct EntityExtractor {
    provider: Arc<dyn ProviderAdapter>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl EntityExtractor {
    /// Creates a new entity extractor.
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        sonar: &SonarConfig,
        memory: &MemoryConfig,
    ) -> Self {
        Self {
            provider,
            model: sonar.extraction_model.clone(),
            max_tokens: sonar.max_tokens,
            temperature: sonar.temperature,
            timeout: Duration::from_secs(memory.extraction_timeout_secs),
        }
    }

    /// Extract entity candidates from one conversation turn.
    ///
    /// The oracle call is bounded by the configured timeout. Returns the
    /// validated candidates; malformed output yields an empty list, a
    /// timeout or transport failure an error. The caller decides how to
    /// degrade.
    pub async fn extract(
        &self,
        user_message: &str,
        assistant_reply: &str,
    ) -> Result<Vec<ExtractedEntity>, AnamnesisError> {
        let turn = format!("User: {user_message}\n\nAssistant: {assistant_reply}");
        let prompt = EXTRACTION_PROMPT.replace("{turn}", &turn);

        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = tokio::time::timeout(self.timeout, self.provider.complete(request))
            .await
            .map_err(|_| AnamnesisError::Timeout {
                duration: self.timeout,
            })??;

        Ok(parse_extraction_response(&response.text))
    }
}

/// Parse the oracle's extraction response into validated candidates.
///
/// Handles markdown code block wrapping and surrounding prose by taking
/// the outermost bracketed span. Non-array output returns an empty Vec;
/// elements that fail to deserialize or carry a blank type or name are
/// skipped individually.
pub fn parse_extraction_response(response: &str) -> Vec<ExtractedEntity> {
    let trimmed = response.trim();

    // Locate the JSON array inside fences or prose. Falls back to the
    // full text when brackets are missing or reversed.
    let json_str = match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    };

    let items = match serde_json::from_str::<serde_json::Value>(json_str) {
        Ok(serde_json::Value::Array(items)) => items,
        Ok(_) => {
            warn!("Extraction response is not a JSON array");
            debug!("Raw response: {response}");
            return Vec::new();
        }
        Err(e) => {
            warn!("Failed to parse extraction response: {e}");
            debug!("Raw response: {response}");
            return Vec::new();
        }
    };

    let mut entities = Vec::new();
    for item in items {
        match serde_json::from_value::<ExtractedEntity>(item) {
            Ok(entity) => {
                if entity.entity_type.trim().is_empty() || entity.entity_name.trim().is_empty() {
                    debug!("Discarding extracted entity with blank type or name");
                    continue;
                }
                entities.push(entity);
            }
            Err(e) => {
                debug!("Discarding malformed extracted entity: {e}");
            }
        }
    }
    entities
}
