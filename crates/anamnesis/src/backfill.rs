// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `anamnesis backfill` - fill in missing embeddings.

use std::sync::Arc;

use anamnesis_config::AnamnesisConfig;
use anamnesis_core::{AnamnesisError, StorageAdapter};
use anamnesis_memory::{EmbeddingBackfill, HttpEmbedder};
use anamnesis_storage::SqliteStorage;

/// Runs one entity batch and one message batch against the configured
/// database and prints how many rows were updated.
pub async fn run(
    config: &AnamnesisConfig,
    batch_size: Option<usize>,
) -> Result<(), AnamnesisError> {
    let batch_size = batch_size.unwrap_or(config.memory.backfill_batch_size);

    let storage: Arc<dyn StorageAdapter> =
        Arc::new(SqliteStorage::new(config.storage.clone()));
    storage.initialize().await?;
    let embedder = Arc::new(HttpEmbedder::new(&config.embedding)?);

    let backfill = EmbeddingBackfill::new(storage.clone(), embedder);
    let entities = backfill.run_entities(batch_size).await?;
    let messages = backfill.run_messages(batch_size).await?;

    println!("backfilled {entities} entity embeddings, {messages} message embeddings");
    storage.close().await
}
