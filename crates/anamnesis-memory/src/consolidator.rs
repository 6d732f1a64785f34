// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Merge-or-create consolidation of extracted entities into patient memory.
//!
//! One consolidation run covers one conversation turn: extract candidate
//! entities, resolve each against the user's existing memory by identity
//! key, merge into the existing record or create a new one, and commit
//! the whole batch in a single transaction. Consolidation never fails
//! the enclosing chat turn; every failure degrades to zero entities.

use std::sync::Arc;

use anamnesis_core::types::{
    now_timestamp, EmbeddingInput, EntityRecord, EntityUpdate,
};
use anamnesis_core::{EmbeddingAdapter, StorageAdapter};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::extractor::EntityExtractor;
use crate::types::{entity_projection, ExtractedEntity};

/// Consolidates extracted entities into per-user memory records.
pub struct Consolidator {
    store: Arc<dyn StorageAdapter>,
    embedder: Arc<dyn EmbeddingAdapter>,
    extractor: EntityExtractor,
    /// Per-user locks serializing the find-or-create window. The UNIQUE
    /// index on the identity key is the storage-level backstop.
    user_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Consolidator {
    /// Creates a new consolidator.
    pub fn new(
        store: Arc<dyn StorageAdapter>,
        embedder: Arc<dyn EmbeddingAdapter>,
        extractor: EntityExtractor,
    ) -> Self {
        Self {
            store,
            embedder,
            extractor,
            user_locks: DashMap::new(),
        }
    }

    /// Consolidate one completed conversation turn into the user's memory.
    ///
    /// Returns the number of newly created entity records. Merged
    /// records do not count. All failures (oracle timeout, malformed
    /// output, storage errors) are logged and reported as zero; nothing
    /// here can fail the chat turn that produced the messages.
    pub async fn consolidate(
        &self,
        user_id: &str,
        conversation_id: &str,
        user_message: &str,
        assistant_reply: &str,
    ) -> usize {
        let candidates = match self.extractor.extract(user_message, assistant_reply).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(user_id, "Entity extraction failed: {e}");
                return 0;
            }
        };
        if candidates.is_empty() {
            return 0;
        }

        // Serialize find-or-create per user so concurrent turns cannot
        // both miss the lookup and insert the same identity key.
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let mut batch: Vec<EntityRecord> = Vec::new();
        let mut created = 0;

        for candidate in candidates {
            let ExtractedEntity {
                entity_type,
                entity_name,
                relationships,
                metadata,
            } = candidate;
            let update = EntityUpdate {
                relationships,
                metadata,
            };

            // Duplicates within one turn collapse against the pending
            // batch before storage is consulted.
            if let Some(pending) = batch.iter_mut().find(|record| {
                record.entity_type == entity_type && record.entity_name == entity_name
            }) {
                pending.merge(update, now_timestamp());
                continue;
            }

            match self.store.find_entity(user_id, &entity_type, &entity_name).await {
                Ok(Some(mut existing)) => {
                    existing.merge(update, now_timestamp());
                    batch.push(existing);
                }
                Ok(None) => {
                    let mut record = EntityRecord::new(
                        user_id,
                        Some(conversation_id.to_string()),
                        entity_type,
                        entity_name,
                    );
                    record.relationships = update.relationships;
                    record.metadata = update.metadata;
                    record.embedding = self.embed_projection(&record).await;
                    batch.push(record);
                    created += 1;
                }
                Err(e) => {
                    warn!(user_id, entity_name, "Entity lookup failed, skipping candidate: {e}");
                }
            }
        }

        if batch.is_empty() {
            return 0;
        }

        if let Err(e) = self.store.upsert_entities(&batch).await {
            warn!(user_id, "Failed to persist consolidated entities: {e}");
            return 0;
        }

        debug!(
            user_id,
            conversation_id,
            saved = batch.len(),
            created,
            "Turn consolidated into memory"
        );
        created
    }

    /// Embed the canonical projection of a newly created record.
    ///
    /// Returns `None` on provider failure; the record is stored without
    /// a vector and backfill repairs it later.
    async fn embed_projection(&self, record: &EntityRecord) -> Option<Vec<f32>> {
        let text = entity_projection(record);
        match self.embedder.embed(EmbeddingInput { texts: vec![text] }).await {
            Ok(output) => output.embeddings.into_iter().next(),
            Err(e) => {
                warn!(
                    entity_name = %record.entity_name,
                    "Embedding failed, storing entity without vector: {e}"
                );
                None
            }
        }
    }

    /// Fetch or create the lock guarding a user's find-or-create window.
    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anamnesis_config::model::{MemoryConfig, SonarConfig, StorageConfig};
    use anamnesis_storage::SqliteStorage;
    use anamnesis_test_utils::{MockEmbedder, MockProvider};
    use serde_json::json;
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

    fn make_consolidator(
        store: Arc<SqliteStorage>,
        provider: Arc<MockProvider>,
        embedder: Arc<MockEmbedder>,
    ) -> Consolidator {
        let extractor =
            EntityExtractor::new(provider, &SonarConfig::default(), &MemoryConfig::default());
        Consolidator::new(store, embedder, extractor)
    }

    fn lisinopril_json() -> String {
        json!([{
            "entityType": "medication",
            "entityName": "Lisinopril",
            "relationships": [{"type": "TREATS", "target": "Hypertension"}],
            "metadata": {"dosage": "10mg"}
        }])
        .to_string()
    }

    #[tokio::test]
    async fn repeated_mentions_collapse_to_one_record() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let provider = Arc::new(MockProvider::with_responses(vec![
            lisinopril_json(),
            json!([{
                "entityType": "medication",
                "entityName": "Lisinopril",
                "relationships": [
                    {"type": "TREATS", "target": "Hypertension"},
                    {"type": "CAUSES", "target": "Dry cough"}
                ],
                "metadata": {"frequency": "daily"}
            }])
            .to_string(),
        ]));
        let consolidator =
            make_consolidator(store.clone(), provider, Arc::new(MockEmbedder::new()));

        let first = consolidator
            .consolidate("user-1", "conv-1", "I take Lisinopril.", "Noted.")
            .await;
        assert_eq!(first, 1);

        // Millisecond timestamps; keep the two runs apart.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let second = consolidator
            .consolidate("user-1", "conv-2", "Lisinopril gives me a cough.", "That can happen.")
            .await;
        assert_eq!(second, 0, "merge into an existing record creates nothing");

        let entities = store.list_entities("user-1").await.unwrap();
        assert_eq!(entities.len(), 1);
        let entity = &entities[0];
        assert_eq!(entity.entity_name, "Lisinopril");
        // Provenance stays with the first conversation.
        assert_eq!(entity.conversation_id.as_deref(), Some("conv-1"));
        // Relationships deduplicated, insertion order preserved.
        assert_eq!(
            entity.relationships,
            vec![
                json!({"type": "TREATS", "target": "Hypertension"}),
                json!({"type": "CAUSES", "target": "Dry cough"})
            ]
        );
        assert_eq!(entity.metadata.get("dosage"), Some(&json!("10mg")));
        assert_eq!(entity.metadata.get("frequency"), Some(&json!("daily")));
        assert!(entity.updated_at > entity.created_at);
    }

    #[tokio::test]
    async fn malformed_oracle_output_saves_nothing() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let provider = Arc::new(MockProvider::with_responses(vec![
            "I could not find any entities, sorry!".to_string(),
        ]));
        let consolidator =
            make_consolidator(store.clone(), provider, Arc::new(MockEmbedder::new()));

        let created = consolidator
            .consolidate("user-1", "conv-1", "hello", "hi")
            .await;
        assert_eq!(created, 0);
        assert!(store.list_entities("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_saves_nothing() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let consolidator = make_consolidator(
            store.clone(),
            Arc::new(MockProvider::failing()),
            Arc::new(MockEmbedder::new()),
        );

        let created = consolidator
            .consolidate("user-1", "conv-1", "hello", "hi")
            .await;
        assert_eq!(created, 0);
        assert!(store.list_entities("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn same_name_different_type_coexist() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let provider = Arc::new(MockProvider::with_responses(vec![json!([
            {"entityType": "condition", "entityName": "Lupus"},
            {"entityType": "topic", "entityName": "Lupus"}
        ])
        .to_string()]));
        let consolidator =
            make_consolidator(store.clone(), provider, Arc::new(MockEmbedder::new()));

        let created = consolidator
            .consolidate("user-1", "conv-1", "Tell me about lupus.", "Lupus is...")
            .await;
        assert_eq!(created, 2);

        let entities = store.list_entities("user-1").await.unwrap();
        assert_eq!(entities.len(), 2);
        let mut types: Vec<&str> = entities.iter().map(|e| e.entity_type.as_str()).collect();
        types.sort();
        assert_eq!(types, vec!["condition", "topic"]);
    }

    #[tokio::test]
    async fn duplicates_within_one_turn_collapse() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let provider = Arc::new(MockProvider::with_responses(vec![json!([
            {"entityType": "medication", "entityName": "Lisinopril", "metadata": {"dosage": "10mg"}},
            {"entityType": "medication", "entityName": "Lisinopril", "metadata": {"frequency": "daily"}}
        ])
        .to_string()]));
        let consolidator =
            make_consolidator(store.clone(), provider, Arc::new(MockEmbedder::new()));

        let created = consolidator
            .consolidate("user-1", "conv-1", "Lisinopril, 10mg daily.", "Got it.")
            .await;
        assert_eq!(created, 1, "the second mention merges into the pending record");

        let entities = store.list_entities("user-1").await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].metadata.get("dosage"), Some(&json!("10mg")));
        assert_eq!(entities[0].metadata.get("frequency"), Some(&json!("daily")));
    }

    #[tokio::test]
    async fn embedding_failure_still_saves_record() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let provider = Arc::new(MockProvider::with_responses(vec![lisinopril_json()]));
        let consolidator =
            make_consolidator(store.clone(), provider, Arc::new(MockEmbedder::failing()));

        let created = consolidator
            .consolidate("user-1", "conv-1", "I take Lisinopril.", "Noted.")
            .await;
        assert_eq!(created, 1);

        let entity = store
            .find_entity("user-1", "medication", "Lisinopril")
            .await
            .unwrap()
            .unwrap();
        assert!(entity.embedding.is_none(), "record stored without a vector");
    }

    #[tokio::test]
    async fn merge_preserves_existing_embedding() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let provider = Arc::new(MockProvider::with_responses(vec![
            lisinopril_json(),
            lisinopril_json(),
        ]));
        let embedder = Arc::new(MockEmbedder::new());
        let consolidator = make_consolidator(store.clone(), provider, embedder.clone());

        consolidator
            .consolidate("user-1", "conv-1", "I take Lisinopril.", "Noted.")
            .await;
        let original = store
            .find_entity("user-1", "medication", "Lisinopril")
            .await
            .unwrap()
            .unwrap();
        let original_embedding = original.embedding.clone();
        assert!(original_embedding.is_some());
        let calls_after_create = embedder.calls();

        consolidator
            .consolidate("user-1", "conv-2", "Still on Lisinopril.", "Good.")
            .await;
        let merged = store
            .find_entity("user-1", "medication", "Lisinopril")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged.embedding, original_embedding);
        assert_eq!(
            embedder.calls(),
            calls_after_create,
            "merge must not call the embedding provider"
        );
    }

    #[tokio::test]
    async fn identity_key_is_case_sensitive() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let provider = Arc::new(MockProvider::with_responses(vec![
            json!([{"entityType": "medication", "entityName": "Lisinopril"}]).to_string(),
            json!([{"entityType": "medication", "entityName": "lisinopril"}]).to_string(),
        ]));
        let consolidator =
            make_consolidator(store.clone(), provider, Arc::new(MockEmbedder::new()));

        consolidator
            .consolidate("user-1", "conv-1", "Lisinopril", "ok")
            .await;
        let created = consolidator
            .consolidate("user-1", "conv-2", "lisinopril", "ok")
            .await;
        assert_eq!(created, 1, "a differently-cased name is a distinct entity");
        assert_eq!(store.list_entities("user-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_runs_with_same_key_yield_one_record() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let provider = Arc::new(MockProvider::with_responses(vec![
            lisinopril_json(),
            lisinopril_json(),
        ]));
        let consolidator = Arc::new(make_consolidator(
            store.clone(),
            provider,
            Arc::new(MockEmbedder::new()),
        ));

        let a = {
            let consolidator = consolidator.clone();
            tokio::spawn(async move {
                consolidator
                    .consolidate("user-1", "conv-1", "I take Lisinopril.", "Noted.")
                    .await
            })
        };
        let b = {
            let consolidator = consolidator.clone();
            tokio::spawn(async move {
                consolidator
                    .consolidate("user-1", "conv-2", "Lisinopril again.", "Still noted.")
                    .await
            })
        };

        let created = a.await.unwrap() + b.await.unwrap();
        assert_eq!(created, 1, "exactly one run creates, the other merges");
        assert_eq!(store.list_entities("user-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_extraction_is_a_noop() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let provider = Arc::new(MockProvider::with_responses(vec!["[]".to_string()]));
        let embedder = Arc::new(MockEmbedder::new());
        let consolidator = make_consolidator(store.clone(), provider, embedder.clone());

        let created = consolidator
            .consolidate("user-1", "conv-1", "nice weather", "indeed")
            .await;
        assert_eq!(created, 0);
        assert_eq!(embedder.calls(), 0);
        assert!(store.list_entities("user-1").await.unwrap().is_empty());
    }
}
