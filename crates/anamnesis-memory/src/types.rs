// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types for the memory engine.

use anamnesis_core::types::{EntityRecord, MessageRecord};
use serde::Deserialize;

/// A candidate entity parsed from the extraction oracle's JSON output.
///
/// Field names follow the JSON contract the extraction prompt demands,
/// so serde maps the camelCase keys onto snake_case fields.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedEntity {
    /// Category tag (condition, medication, symptom, ...).
    #[serde(rename = "entityType")]
    pub entity_type: String,
    /// Canonical display string.
    #[serde(rename = "entityName")]
    pub entity_name: String,
    /// Structured relationship objects.
    #[serde(default)]
    pub relationships: Vec<serde_json::Value>,
    /// Key/value annotations.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// The assistant half of a conversation turn submitted to the worker.
#[derive(Debug, Clone, Default)]
pub struct AssistantReply {
    /// Reply text.
    pub content: String,
    /// Citation URLs, when the provider returned any.
    pub citations: Option<Vec<String>>,
    /// Raw search results, when the provider returned any.
    pub search_results: Option<serde_json::Value>,
    /// Model that produced the reply.
    pub model: Option<String>,
}

/// Canonical text projection of an entity for embedding.
///
/// Deterministic: field order is fixed and metadata keys iterate in
/// sorted order (`serde_json::Map` is BTreeMap-backed), so semantically
/// identical records always produce the same projection.
pub fn entity_projection(record: &EntityRecord) -> String {
    let relationships = serde_json::Value::Array(record.relationships.clone());
    let metadata = serde_json::Value::Object(record.metadata.clone());
    format!(
        "{}\n{}\n{relationships}\n{metadata}",
        record.entity_name, record.entity_type
    )
}

/// Canonical text projection of a message for embedding.
///
/// Role and content always; citations and search results appended only
/// when present so plain messages project to plain text.
pub fn message_projection(message: &MessageRecord) -> String {
    let mut text = format!("{}: {}", message.role.as_str(), message.content);
    if let Some(citations) = &message.citations {
        text.push_str(&format!("\ncitations: {}", serde_json::json!(citations)));
    }
    if let Some(results) = &message.search_results {
        text.push_str(&format!("\nresults: {results}"));
    }
    text
}
