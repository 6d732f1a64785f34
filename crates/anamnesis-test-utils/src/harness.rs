// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles the complete memory pipeline with mock
//! adapters and a temp SQLite database: worker, consolidator,
//! retriever, and backfill, wired exactly as the binary wires them.
//! The worker runs on its own storage instance; `storage` is the
//! request-path instance tests assert against.

use std::sync::Arc;
use std::time::Duration;

use anamnesis_config::model::{MemoryConfig, SonarConfig, StorageConfig, WorkerConfig};
use anamnesis_core::{AnamnesisError, EmbeddingAdapter, ProviderAdapter, StorageAdapter};
use anamnesis_memory::types::AssistantReply;
use anamnesis_memory::{
    Consolidator, EmbeddingBackfill, EntityExtractor, MemoryWorker, Retriever, TurnJob,
};
use anamnesis_storage::SqliteStorage;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::mock_embedder::MockEmbedder;
use crate::mock_provider::MockProvider;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    oracle_responses: Vec<String>,
    memory: Option<MemoryConfig>,
    worker: Option<WorkerConfig>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            oracle_responses: Vec::new(),
            memory: None,
            worker: None,
        }
    }

    /// Set mock oracle responses, consumed in order.
    pub fn with_oracle_responses(mut self, responses: Vec<String>) -> Self {
        self.oracle_responses = responses;
        self
    }

    /// Override the memory configuration.
    pub fn with_memory_config(mut self, memory: MemoryConfig) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Override the worker configuration.
    pub fn with_worker_config(mut self, worker: WorkerConfig) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, AnamnesisError> {
        let temp_dir = tempfile::TempDir::new()
            .map_err(|e| AnamnesisError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("test.db").to_string_lossy().into_owned();

        let storage_config = StorageConfig {
            database_path: db_path,
            wal_mode: true,
        };

        // Request-path instance, used by retriever, backfill, and assertions.
        let storage = Arc::new(SqliteStorage::new(storage_config.clone()));
        storage.initialize().await?;
        let storage: Arc<dyn StorageAdapter> = storage;

        // The worker gets its own instance on the same database.
        let worker_storage = Arc::new(SqliteStorage::new(storage_config));
        worker_storage.initialize().await?;
        let worker_storage: Arc<dyn StorageAdapter> = worker_storage;

        let mock_provider = Arc::new(if self.oracle_responses.is_empty() {
            MockProvider::new()
        } else {
            MockProvider::with_responses(self.oracle_responses)
        });
        let mock_embedder = Arc::new(MockEmbedder::new());

        let memory = self.memory.unwrap_or_default();
        let worker_config = self.worker.unwrap_or_default();
        let sonar = SonarConfig::default();

        let extractor = EntityExtractor::new(
            mock_provider.clone() as Arc<dyn ProviderAdapter>,
            &sonar,
            &memory,
        );
        let consolidator = Arc::new(Consolidator::new(
            worker_storage.clone(),
            mock_embedder.clone() as Arc<dyn EmbeddingAdapter>,
            extractor,
        ));
        let retriever = Retriever::new(
            storage.clone(),
            mock_embedder.clone() as Arc<dyn EmbeddingAdapter>,
            memory.clone(),
        );
        let backfill = EmbeddingBackfill::new(
            storage.clone(),
            mock_embedder.clone() as Arc<dyn EmbeddingAdapter>,
        );

        let cancel = CancellationToken::new();
        let (worker, worker_handle) = MemoryWorker::spawn(
            &worker_config,
            worker_storage,
            mock_embedder.clone() as Arc<dyn EmbeddingAdapter>,
            memory.enabled.then(|| consolidator.clone()),
            cancel.clone(),
        );

        Ok(TestHarness {
            mock_provider,
            mock_embedder,
            storage,
            consolidator,
            retriever,
            backfill,
            worker,
            cancel,
            worker_handle,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete memory pipeline with mock adapters and temp storage.
pub struct TestHarness {
    /// The mock extraction oracle.
    pub mock_provider: Arc<MockProvider>,
    /// The mock embedding provider.
    pub mock_embedder: Arc<MockEmbedder>,
    /// Request-path storage instance (temp DB, cleaned up on drop).
    pub storage: Arc<dyn StorageAdapter>,
    /// The consolidator the worker runs, for direct-call tests.
    pub consolidator: Arc<Consolidator>,
    /// Retriever over the request-path storage.
    pub retriever: Retriever,
    /// Backfill runner over the request-path storage.
    pub backfill: EmbeddingBackfill,
    /// Submission handle for the background worker.
    pub worker: MemoryWorker,
    /// Token cancelling the worker task.
    pub cancel: CancellationToken,
    worker_handle: JoinHandle<()>,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Submit a completed turn to the background worker.
    pub fn submit_turn(
        &self,
        user_id: &str,
        conversation_id: &str,
        user_message: &str,
        assistant_text: &str,
    ) {
        self.worker.submit(TurnJob {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            user_message: user_message.to_string(),
            assistant_reply: AssistantReply {
                content: assistant_text.to_string(),
                ..AssistantReply::default()
            },
        });
    }

    /// Wait until the user has exactly `count` entity records.
    ///
    /// Panics when the count is not reached within five seconds.
    pub async fn wait_for_entity_count(&self, user_id: &str, count: usize) {
        let mut seen = 0;
        for _ in 0..250 {
            seen = self
                .storage
                .list_entities(user_id)
                .await
                .map_or(0, |entities| entities.len());
            if seen == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {count} entities for {user_id}, saw {seen} after 5s");
    }

    /// Wait until the conversation holds exactly `count` messages.
    ///
    /// Panics when the count is not reached within five seconds.
    pub async fn wait_for_message_count(&self, conversation_id: &str, count: usize) {
        let mut seen = 0;
        for _ in 0..250 {
            seen = self
                .storage
                .get_messages(conversation_id, None)
                .await
                .map_or(0, |messages| messages.len());
            if seen == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {count} messages in {conversation_id}, saw {seen} after 5s");
    }

    /// Cancel the worker and wait for it to drain and exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.worker_handle.await.expect("memory worker panicked");
    }
}
