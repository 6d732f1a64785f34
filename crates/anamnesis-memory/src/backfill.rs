// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Repair pass for rows persisted without an embedding.
//!
//! Records are saved even when the embedding provider is down, with a
//! NULL vector. Backfill scans those rows in batches and fills the
//! vectors in, making them visible to similarity search.

use std::sync::Arc;

use anamnesis_core::error::AnamnesisError;
use anamnesis_core::types::EmbeddingInput;
use anamnesis_core::{EmbeddingAdapter, StorageAdapter};
use tracing::{debug, warn};

use crate::types::{entity_projection, message_projection};

/// Fills in missing embeddings for stored entities and messages.
pub struct EmbeddingBackfill {
    store: Arc<dyn StorageAdapter>,
    embedder: Arc<dyn EmbeddingAdapter>,
}

impl EmbeddingBackfill {
    /// Creates a new backfill runner.
    pub fn new(store: Arc<dyn StorageAdapter>, embedder: Arc<dyn EmbeddingAdapter>) -> Self {
        Self { store, embedder }
    }

    /// Embeds up to `batch_size` entities stored without a vector.
    ///
    /// Rows with a blank entity name are skipped, and one row's
    /// embedding failure does not stop the batch. Returns the number
    /// of rows actually updated.
    pub async fn run_entities(&self, batch_size: usize) -> Result<usize, AnamnesisError> {
        let rows = self.store.entities_missing_embedding(batch_size).await?;
        let scanned = rows.len();
        let mut updated = 0;

        for entity in rows {
            if entity.entity_name.trim().is_empty() {
                debug!(id = %entity.id, "Skipping entity with blank name");
                continue;
            }
            let Some(embedding) = self.embed(entity_projection(&entity)).await else {
                warn!(id = %entity.id, entity_name = %entity.entity_name, "Skipping entity after embedding failure");
                continue;
            };
            match self.store.set_entity_embedding(&entity.id, &embedding).await {
                Ok(()) => updated += 1,
                Err(e) => warn!(id = %entity.id, "Failed to store entity embedding: {e}"),
            }
        }

        debug!(scanned, updated, "Entity embedding backfill batch done");
        Ok(updated)
    }

    /// Embeds up to `batch_size` messages stored without a vector.
    ///
    /// Rows with blank content are skipped, and one row's embedding
    /// failure does not stop the batch. Returns the number of rows
    /// actually updated.
    pub async fn run_messages(&self, batch_size: usize) -> Result<usize, AnamnesisError> {
        let rows = self.store.messages_missing_embedding(batch_size).await?;
        let scanned = rows.len();
        let mut updated = 0;

        for message in rows {
            if message.content.trim().is_empty() {
                debug!(id = %message.id, "Skipping message with blank content");
                continue;
            }
            let Some(embedding) = self.embed(message_projection(&message)).await else {
                warn!(id = %message.id, "Skipping message after embedding failure");
                continue;
            };
            match self.store.set_message_embedding(&message.id, &embedding).await {
                Ok(()) => updated += 1,
                Err(e) => warn!(id = %message.id, "Failed to store message embedding: {e}"),
            }
        }

        debug!(scanned, updated, "Message embedding backfill batch done");
        Ok(updated)
    }

    async fn embed(&self, text: String) -> Option<Vec<f32>> {
        match self.embedder.embed(EmbeddingInput { texts: vec![text] }).await {
            Ok(output) => output.embeddings.into_iter().next(),
            Err(e) => {
                warn!("Embedding request failed: {e}");
                None
            }
        }
    }
}
