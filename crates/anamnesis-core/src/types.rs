// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across adapter traits and the anamnesis engine.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind the base [`Adapter`](crate::Adapter) trait.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Provider,
    Storage,
    Embedding,
}

/// Speaker role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    /// Convert to string for SQLite storage and wire payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::System => "system",
        }
    }

    /// Parse from SQLite string.
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "assistant" => ChatRole::Assistant,
            "system" => ChatRole::System,
            _ => ChatRole::User,
        }
    }
}

/// A conversation owned by a user. Messages and extracted entities hang off it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Display title, defaults to "New Chat" until renamed.
    pub title: String,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// ISO 8601 last-activity timestamp.
    pub updated_at: String,
}

impl Conversation {
    /// Create a conversation with a fresh id. A blank title becomes "New Chat".
    pub fn new(user_id: impl Into<String>, title: &str) -> Self {
        let now = now_timestamp();
        let title = if title.trim().is_empty() {
            "New Chat".to_string()
        } else {
            title.to_string()
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            title,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// A single chat message, immutable once stored.
///
/// The embedding is the only column backfill may fill in later when it was
/// unavailable at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique identifier.
    pub id: String,
    /// Conversation this message belongs to.
    pub conversation_id: String,
    /// Speaker role.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
    /// Citation URLs attached to an assistant reply, if any.
    pub citations: Option<Vec<String>>,
    /// Raw search results attached to an assistant reply, if any.
    pub search_results: Option<serde_json::Value>,
    /// Model that produced an assistant reply, if any.
    pub model: Option<String>,
    /// Embedding of the message projection, `None` when the provider failed.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
}

impl MessageRecord {
    /// Create a message with a fresh id and no optional fields set.
    pub fn new(
        conversation_id: impl Into<String>,
        role: ChatRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            citations: None,
            search_results: None,
            model: None,
            embedding: None,
            created_at: now_timestamp(),
        }
    }
}

/// One row of patient memory: a deduplicated structured fact about a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Unique identifier, assigned at creation, immutable.
    pub id: String,
    /// Owning user; memory is strictly partitioned per user.
    pub user_id: String,
    /// Conversation that first produced the entity. Never re-assigned on merge.
    pub conversation_id: Option<String>,
    /// Free-form category tag (condition, medication, symptom, person, ...).
    pub entity_type: String,
    /// Canonical display string. `(user_id, entity_type, entity_name)` is the
    /// identity key used for deduplication, matched exactly and case-sensitively.
    pub entity_name: String,
    /// Structured relationship objects, insertion-ordered, deduplicated on merge.
    pub relationships: Vec<serde_json::Value>,
    /// Key/value annotations. Merge overwrites existing keys and adds new ones.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Embedding of the entity projection, generated only at creation.
    /// `None` when the provider failed at creation time (backfill repairs it).
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// ISO 8601 creation timestamp. Never changed after creation.
    pub created_at: String,
    /// ISO 8601 timestamp of the last merge.
    pub updated_at: String,
}

/// An explicit, enumerated update applied to an existing [`EntityRecord`].
///
/// Merges never assign arbitrary keys to fields; the two mergeable fields
/// are named here and nothing else on a record can change through a merge.
#[derive(Debug, Clone, Default)]
pub struct EntityUpdate {
    /// Relationship objects to append (deduplicated by deep equality).
    pub relationships: Vec<serde_json::Value>,
    /// Metadata keys to overwrite or add. Keys are never removed.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl EntityRecord {
    /// Create an entity with a fresh id, empty relationships, and empty metadata.
    pub fn new(
        user_id: impl Into<String>,
        conversation_id: Option<String>,
        entity_type: impl Into<String>,
        entity_name: impl Into<String>,
    ) -> Self {
        let now = now_timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            conversation_id,
            entity_type: entity_type.into(),
            entity_name: entity_name.into(),
            relationships: Vec::new(),
            metadata: serde_json::Map::new(),
            embedding: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Apply a merge update to this record.
    ///
    /// Incoming relationships already present (deep equality) are dropped;
    /// the rest are appended in order. Metadata keys overwrite or add,
    /// never remove. `id`, `user_id`, `conversation_id`, `entity_type`,
    /// `entity_name`, `embedding`, and `created_at` are untouched.
    pub fn merge(&mut self, update: EntityUpdate, updated_at: String) {
        for rel in update.relationships {
            if !self.relationships.contains(&rel) {
                self.relationships.push(rel);
            }
        }
        for (key, value) in update.metadata {
            self.metadata.insert(key, value);
        }
        self.updated_at = updated_at;
    }
}

/// An entity record with a similarity score from retrieval.
#[derive(Debug, Clone)]
pub struct ScoredEntity {
    /// The entity record.
    pub entity: EntityRecord,
    /// Cosine similarity against the query, in [0, 1] after thresholding.
    pub score: f32,
}

/// A message record with a similarity score from retrieval.
#[derive(Debug, Clone)]
pub struct ScoredMessage {
    /// The message record.
    pub message: MessageRecord,
    /// Cosine similarity against the query, in [0, 1] after thresholding.
    pub score: f32,
}

/// Input for an embedding adapter.
#[derive(Debug, Clone)]
pub struct EmbeddingInput {
    /// Texts to embed, one vector returned per text.
    pub texts: Vec<String>,
}

/// Output from an embedding adapter.
#[derive(Debug, Clone)]
pub struct EmbeddingOutput {
    /// One vector per input text, in input order.
    pub embeddings: Vec<Vec<f32>>,
    /// Dimensionality of the returned vectors.
    pub dimensions: usize,
}

/// A single message in a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// A request to the extraction-model provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier as the provider expects it.
    pub model: String,
    /// Conversation turns, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

/// A response from the extraction-model provider.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// The full generated text.
    pub text: String,
    /// Model that actually served the request, when reported.
    pub model: Option<String>,
}

/// Current UTC time formatted to millisecond precision with a Z suffix.
///
/// Matches the `strftime('%Y-%m-%dT%H:%M:%fZ', 'now')` defaults in the
/// schema so Rust-side and SQL-side timestamps sort together.
pub fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Convert f32 vector to bytes for SQLite BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert SQLite BLOB back to f32 vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths, empty inputs, or zero-norm vectors
/// so that malformed stored rows rank last instead of aborting a search.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
