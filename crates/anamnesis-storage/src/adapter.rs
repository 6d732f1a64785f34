// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the StorageAdapter trait.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use anamnesis_config::model::StorageConfig;
use anamnesis_core::types::{Conversation, EntityRecord, MessageRecord, ScoredEntity, ScoredMessage};
use anamnesis_core::{Adapter, AdapterType, AnamnesisError, HealthStatus, StorageAdapter};

use crate::database::Database;
use crate::queries;

/// SQLite-backed storage adapter.
///
/// Wraps a [`Database`] handle and delegates all query operations to the
/// typed query modules. The database is lazily initialized on the first
/// call to [`StorageAdapter::initialize`].
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a new SqliteStorage with the given configuration.
    ///
    /// The database connection is not opened until [`initialize`] is called.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Returns a reference to the underlying Database, or an error if not initialized.
    fn db(&self) -> Result<&Database, AnamnesisError> {
        self.db.get().ok_or_else(|| AnamnesisError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }
}

#[async_trait]
impl Adapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, AnamnesisError> {
        let db = self.db()?;
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), AnamnesisError> {
        // Shutdown delegates to close if the DB was initialized.
        if let Some(db) = self.db.get() {
            db.connection()
                .call(|conn| -> Result<(), rusqlite::Error> {
                    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                    Ok(())
                })
                .await
                .map_err(crate::database::map_tr_err)?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), AnamnesisError> {
        let path = self.config.database_path.clone();
        let db = Database::open(&path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| AnamnesisError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), AnamnesisError> {
        let db = self.db()?;
        // Checkpoint WAL before close.
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    // --- Conversation operations ---

    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), AnamnesisError> {
        queries::conversations::insert_conversation(self.db()?, conversation).await
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, AnamnesisError> {
        queries::conversations::get_conversation(self.db()?, id).await
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, AnamnesisError> {
        queries::conversations::list_conversations(self.db()?, user_id).await
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> Result<(), AnamnesisError> {
        queries::conversations::rename_conversation(self.db()?, id, title).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), AnamnesisError> {
        queries::conversations::delete_conversation_cascade(self.db()?, id).await
    }

    // --- Message operations ---

    async fn insert_message(&self, message: &MessageRecord) -> Result<(), AnamnesisError> {
        queries::messages::insert_message(self.db()?, message).await
    }

    async fn get_messages(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MessageRecord>, AnamnesisError> {
        queries::messages::get_messages(self.db()?, conversation_id, limit).await
    }

    async fn search_messages(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        query_embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredMessage>, AnamnesisError> {
        queries::messages::search_messages(
            self.db()?,
            user_id,
            conversation_id,
            query_embedding,
            threshold,
            limit,
        )
        .await
    }

    // --- Entity operations ---

    async fn find_entity(
        &self,
        user_id: &str,
        entity_type: &str,
        entity_name: &str,
    ) -> Result<Option<EntityRecord>, AnamnesisError> {
        queries::entities::find_entity(self.db()?, user_id, entity_type, entity_name).await
    }

    async fn upsert_entity(&self, entity: &EntityRecord) -> Result<(), AnamnesisError> {
        queries::entities::upsert_entity(self.db()?, entity).await
    }

    async fn upsert_entities(&self, entities: &[EntityRecord]) -> Result<(), AnamnesisError> {
        queries::entities::upsert_entities(self.db()?, entities).await
    }

    async fn list_entities(&self, user_id: &str) -> Result<Vec<EntityRecord>, AnamnesisError> {
        queries::entities::list_entities(self.db()?, user_id).await
    }

    async fn delete_entity(&self, id: &str) -> Result<(), AnamnesisError> {
        queries::entities::delete_entity(self.db()?, id).await
    }

    async fn delete_entities_for_user(&self, user_id: &str) -> Result<usize, AnamnesisError> {
        queries::entities::delete_entities_for_user(self.db()?, user_id).await
    }

    async fn delete_entities_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<usize, AnamnesisError> {
        queries::entities::delete_entities_for_conversation(self.db()?, conversation_id).await
    }

    async fn search_entities(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredEntity>, AnamnesisError> {
        queries::entities::search_entities(self.db()?, user_id, query_embedding, threshold, limit)
            .await
    }

    // --- Embedding backfill operations ---

    async fn messages_missing_embedding(
        &self,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, AnamnesisError> {
        queries::messages::messages_missing_embedding(self.db()?, limit).await
    }

    async fn set_message_embedding(
        &self,
        id: &str,
        embedding: &[f32],
    ) -> Result<(), AnamnesisError> {
        queries::messages::set_message_embedding(self.db()?, id, embedding).await
    }

    async fn entities_missing_embedding(
        &self,
        limit: usize,
    ) -> Result<Vec<EntityRecord>, AnamnesisError> {
        queries::entities::entities_missing_embedding(self.db()?, limit).await
    }

    async fn set_entity_embedding(&self, id: &str, embedding: &[f32]) -> Result<(), AnamnesisError> {
        queries::entities::set_entity_embedding(self.db()?, id, embedding).await
    }

    // --- User data operations ---

    async fn purge_user_data(&self, user_id: &str) -> Result<(), AnamnesisError> {
        queries::users::purge_user_data(self.db()?, user_id).await
    }

    async fn transfer_user_data(&self, from_user: &str, to_user: &str) -> Result<(), AnamnesisError> {
        queries::users::transfer_user_data(self.db()?, from_user, to_user).await
    }
}
