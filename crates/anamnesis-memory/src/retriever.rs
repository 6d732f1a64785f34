// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Similarity retrieval over patient memory and conversation history.
//!
//! Retrieval runs on the hot path of a chat turn, so it never returns
//! an error: any failure is logged and degrades to an empty result,
//! and the caller proceeds without recalled context.

use std::sync::Arc;

use anamnesis_config::model::MemoryConfig;
use anamnesis_core::types::{EmbeddingInput, ScoredEntity, ScoredMessage};
use anamnesis_core::{EmbeddingAdapter, StorageAdapter};
use tracing::warn;

/// Embeds a query and searches stored vectors for the nearest records.
pub struct Retriever {
    store: Arc<dyn StorageAdapter>,
    embedder: Arc<dyn EmbeddingAdapter>,
    config: MemoryConfig,
}

impl Retriever {
    /// Creates a new retriever.
    pub fn new(
        store: Arc<dyn StorageAdapter>,
        embedder: Arc<dyn EmbeddingAdapter>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Returns the user's memory entities most similar to `query`,
    /// best match first. Empty when memory is disabled or on failure.
    pub async fn search_memories(&self, user_id: &str, query: &str) -> Vec<ScoredEntity> {
        if !self.config.enabled {
            return Vec::new();
        }
        let Some(embedding) = self.embed_query(query).await else {
            return Vec::new();
        };
        match self
            .store
            .search_entities(
                user_id,
                &embedding,
                self.config.memory_search_threshold,
                self.config.memory_search_limit,
            )
            .await
        {
            Ok(entities) => entities,
            Err(e) => {
                warn!(user_id, "Memory search failed: {e}");
                Vec::new()
            }
        }
    }

    /// Returns the user's past messages most similar to `query`, best
    /// match first, optionally narrowed to a single conversation.
    /// Empty when memory is disabled or on failure.
    pub async fn search_messages(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        query: &str,
    ) -> Vec<ScoredMessage> {
        if !self.config.enabled {
            return Vec::new();
        }
        let Some(embedding) = self.embed_query(query).await else {
            return Vec::new();
        };
        match self
            .store
            .search_messages(
                user_id,
                conversation_id,
                &embedding,
                self.config.message_search_threshold,
                self.config.message_search_limit,
            )
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!(user_id, "Message search failed: {e}");
                Vec::new()
            }
        }
    }

    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        match self
            .embedder
            .embed(EmbeddingInput {
                texts: vec![query.to_string()],
            })
            .await
        {
            Ok(output) => output.embeddings.into_iter().next(),
            Err(e) => {
                warn!("Failed to embed search query: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anamnesis_config::model::StorageConfig;
    use anamnesis_core::types::{ChatRole, Conversation, EntityRecord, MessageRecord};
    use anamnesis_storage::SqliteStorage;
    use anamnesis_test_utils::MockEmbedder;
    use tempfile::{tempdir, TempDir};

    async fn open_store(dir: &TempDir) -> Arc<SqliteStorage> {
        let config = StorageConfig {
            database_path: dir.path().join("test.db").to_string_lossy().into_owned(),
            wal_mode: true,
        };
        let storage = Arc::new(SqliteStorage::new(config));
        storage.initialize().await.unwrap();
        storage
    }

    async fn seed_entity(
        store: &Arc<SqliteStorage>,
        name: &str,
        embedding: Option<Vec<f32>>,
    ) {
        let mut record = EntityRecord::new("user-1", None, "medication", name);
        record.embedding = embedding;
        store.upsert_entity(&record).await.unwrap();
    }

    #[tokio::test]
    async fn search_memories_ranks_by_similarity() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        seed_entity(&store, "exact", Some(vec![1.0, 0.0, 0.0])).await;
        seed_entity(&store, "close", Some(vec![0.8, 0.6, 0.0])).await;
        seed_entity(&store, "orthogonal", Some(vec![0.0, 1.0, 0.0])).await;
        seed_entity(&store, "unembedded", None).await;

        let embedder = Arc::new(MockEmbedder::returning(vec![1.0, 0.0, 0.0]));
        let retriever = Retriever::new(store, embedder, MemoryConfig::default());

        let results = retriever.search_memories("user-1", "blood pressure").await;
        let names: Vec<&str> = results
            .iter()
            .map(|scored| scored.entity.entity_name.as_str())
            .collect();
        assert_eq!(names, vec!["exact", "close"]);
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn search_memories_caps_at_configured_limit() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        for i in 0..8 {
            seed_entity(&store, &format!("entity-{i}"), Some(vec![1.0, 0.0, 0.0])).await;
        }

        let embedder = Arc::new(MockEmbedder::returning(vec![1.0, 0.0, 0.0]));
        let config = MemoryConfig::default();
        let limit = config.memory_search_limit;
        let retriever = Retriever::new(store, embedder, config);

        let results = retriever.search_memories("user-1", "anything").await;
        assert_eq!(results.len(), limit);
    }

    #[tokio::test]
    async fn search_memories_is_empty_when_disabled() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        seed_entity(&store, "exact", Some(vec![1.0, 0.0, 0.0])).await;

        let embedder = Arc::new(MockEmbedder::returning(vec![1.0, 0.0, 0.0]));
        let config = MemoryConfig {
            enabled: false,
            ..MemoryConfig::default()
        };
        let retriever = Retriever::new(store, embedder.clone(), config);

        assert!(retriever.search_memories("user-1", "anything").await.is_empty());
        assert_eq!(embedder.calls(), 0, "disabled memory must not embed");
    }

    #[tokio::test]
    async fn embedding_failure_returns_empty() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        seed_entity(&store, "exact", Some(vec![1.0, 0.0, 0.0])).await;

        let retriever = Retriever::new(
            store,
            Arc::new(MockEmbedder::failing()),
            MemoryConfig::default(),
        );
        assert!(retriever.search_memories("user-1", "anything").await.is_empty());
        assert!(retriever
            .search_messages("user-1", None, "anything")
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn storage_failure_returns_empty() {
        let dir = tempdir().unwrap();
        // Not initialized, so every query fails.
        let config = StorageConfig {
            database_path: dir.path().join("test.db").to_string_lossy().into_owned(),
            wal_mode: true,
        };
        let store = Arc::new(SqliteStorage::new(config));

        let retriever = Retriever::new(
            store,
            Arc::new(MockEmbedder::returning(vec![1.0, 0.0, 0.0])),
            MemoryConfig::default(),
        );
        assert!(retriever.search_memories("user-1", "anything").await.is_empty());
        assert!(retriever
            .search_messages("user-1", None, "anything")
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn search_messages_honors_conversation_scope() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        let first = Conversation::new("user-1", "First");
        store.create_conversation(&first).await.unwrap();
        let second = Conversation::new("user-1", "Second");
        store.create_conversation(&second).await.unwrap();

        let mut in_first =
            MessageRecord::new(first.id.clone(), ChatRole::User, "aching joints");
        in_first.embedding = Some(vec![1.0, 0.0, 0.0]);
        store.insert_message(&in_first).await.unwrap();
        let mut in_second =
            MessageRecord::new(second.id.clone(), ChatRole::User, "joint pain again");
        in_second.embedding = Some(vec![1.0, 0.0, 0.0]);
        store.insert_message(&in_second).await.unwrap();

        let retriever = Retriever::new(
            store,
            Arc::new(MockEmbedder::returning(vec![1.0, 0.0, 0.0])),
            MemoryConfig::default(),
        );

        let all = retriever.search_messages("user-1", None, "joints").await;
        assert_eq!(all.len(), 2);

        let scoped = retriever
            .search_messages("user-1", Some(second.id.as_str()), "joints")
            .await;
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].message.id, in_second.id);
    }
}
