// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage adapter trait for persistence backends (SQLite, etc.).

use async_trait::async_trait;

use crate::error::AnamnesisError;
use crate::traits::adapter::Adapter;
use crate::types::{
    Conversation, EntityRecord, MessageRecord, ScoredEntity, ScoredMessage,
};

/// Adapter for storage and persistence backends.
///
/// Storage adapters manage the lifecycle of database connections and
/// implement the full persistence contract for conversations, messages,
/// and patient memory entities. All similarity searches take a
/// pre-computed query embedding so that backends never depend on an
/// embedding provider themselves.
#[async_trait]
pub trait StorageAdapter: Adapter {
    /// Initializes the storage backend (migrations, connection pool, etc.).
    async fn initialize(&self) -> Result<(), AnamnesisError>;

    /// Closes the storage backend, flushing pending writes and releasing connections.
    async fn close(&self) -> Result<(), AnamnesisError>;

    // --- Conversations ---

    /// Inserts a conversation. Use [`Conversation::new`] to build one.
    async fn create_conversation(&self, conversation: &Conversation)
        -> Result<(), AnamnesisError>;

    /// Fetches a conversation by id.
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, AnamnesisError>;

    /// Lists a user's conversations, most recently updated first.
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, AnamnesisError>;

    /// Renames a conversation.
    async fn rename_conversation(&self, id: &str, title: &str) -> Result<(), AnamnesisError>;

    /// Deletes a conversation along with its messages and the entities it
    /// first produced, in a single transaction.
    async fn delete_conversation(&self, id: &str) -> Result<(), AnamnesisError>;

    // --- Messages ---

    /// Inserts a message. Messages are immutable once stored.
    async fn insert_message(&self, message: &MessageRecord) -> Result<(), AnamnesisError>;

    /// Fetches messages for a conversation in chronological order.
    ///
    /// With a limit, returns the most recent `limit` messages, still oldest
    /// first.
    async fn get_messages(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MessageRecord>, AnamnesisError>;

    /// Similarity search over a user's messages, optionally narrowed to a
    /// single conversation.
    ///
    /// Returns messages whose embedding scores at or above `threshold`
    /// against the query embedding, highest score first, at most `limit`.
    /// Rows without an embedding are skipped.
    async fn search_messages(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        query_embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredMessage>, AnamnesisError>;

    // --- Patient memory entities ---

    /// Looks up an entity by its identity key, matched exactly and
    /// case-sensitively.
    async fn find_entity(
        &self,
        user_id: &str,
        entity_type: &str,
        entity_name: &str,
    ) -> Result<Option<EntityRecord>, AnamnesisError>;

    /// Inserts the entity, or replaces the stored row with the same id.
    async fn upsert_entity(&self, entity: &EntityRecord) -> Result<(), AnamnesisError>;

    /// Upserts a batch of entities in a single transaction.
    ///
    /// Either every record in the batch is committed or none are.
    async fn upsert_entities(&self, entities: &[EntityRecord]) -> Result<(), AnamnesisError>;

    /// Lists a user's entities, most recently updated first.
    async fn list_entities(&self, user_id: &str) -> Result<Vec<EntityRecord>, AnamnesisError>;

    /// Deletes an entity by id.
    async fn delete_entity(&self, id: &str) -> Result<(), AnamnesisError>;

    /// Deletes all of a user's entities. Returns the number deleted.
    async fn delete_entities_for_user(&self, user_id: &str) -> Result<usize, AnamnesisError>;

    /// Deletes all entities whose provenance points at the conversation.
    /// Returns the number deleted.
    async fn delete_entities_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<usize, AnamnesisError>;

    /// Similarity search over a user's entities, same contract as
    /// [`search_messages`](Self::search_messages).
    async fn search_entities(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredEntity>, AnamnesisError>;

    // --- Embedding backfill ---

    /// Fetches up to `limit` messages stored without an embedding, oldest first.
    async fn messages_missing_embedding(
        &self,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, AnamnesisError>;

    /// Sets the embedding for a message that was stored without one.
    async fn set_message_embedding(
        &self,
        id: &str,
        embedding: &[f32],
    ) -> Result<(), AnamnesisError>;

    /// Fetches up to `limit` entities stored without an embedding, oldest first.
    async fn entities_missing_embedding(
        &self,
        limit: usize,
    ) -> Result<Vec<EntityRecord>, AnamnesisError>;

    /// Sets the embedding for an entity that was stored without one.
    async fn set_entity_embedding(
        &self,
        id: &str,
        embedding: &[f32],
    ) -> Result<(), AnamnesisError>;

    // --- Account teardown ---

    /// Deletes every row belonging to a user (conversations, messages,
    /// entities) in a single transaction.
    async fn purge_user_data(&self, user_id: &str) -> Result<(), AnamnesisError>;

    /// Re-assigns all of one user's data to another, in a single transaction.
    ///
    /// Entities whose identity key already exists under the target user are
    /// merged into the target's record instead of duplicated.
    async fn transfer_user_data(
        &self,
        from_user: &str,
        to_user: &str,
    ) -> Result<(), AnamnesisError>;
}
