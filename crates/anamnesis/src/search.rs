// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `anamnesis search` - similarity search over memory and messages.

use std::sync::Arc;

use anamnesis_config::AnamnesisConfig;
use anamnesis_core::{AnamnesisError, StorageAdapter};
use anamnesis_memory::{HttpEmbedder, Retriever};
use anamnesis_storage::SqliteStorage;

/// Embeds the query and prints ranked matches with scores.
pub async fn run(
    config: &AnamnesisConfig,
    user_id: &str,
    query: &str,
    messages: bool,
    conversation: Option<&str>,
) -> Result<(), AnamnesisError> {
    let storage: Arc<dyn StorageAdapter> =
        Arc::new(SqliteStorage::new(config.storage.clone()));
    storage.initialize().await?;
    let embedder = Arc::new(HttpEmbedder::new(&config.embedding)?);
    let retriever = Retriever::new(storage.clone(), embedder, config.memory.clone());

    if messages {
        let results = retriever.search_messages(user_id, conversation, query).await;
        if results.is_empty() {
            println!("no matching messages");
        }
        for scored in &results {
            println!(
                "{:.3}  [{}] {}: {}",
                scored.score,
                scored.message.conversation_id,
                scored.message.role.as_str(),
                scored.message.content
            );
        }
    } else {
        let results = retriever.search_memories(user_id, query).await;
        if results.is_empty() {
            println!("no matching entities");
        }
        for scored in &results {
            let entity = &scored.entity;
            println!(
                "{:.3}  {} ({})",
                scored.score, entity.entity_name, entity.entity_type
            );
            if !entity.relationships.is_empty() {
                let rels = serde_json::Value::Array(entity.relationships.clone());
                println!("       relationships: {rels}");
            }
            if !entity.metadata.is_empty() {
                let meta = serde_json::Value::Object(entity.metadata.clone());
                println!("       metadata: {meta}");
            }
        }
    }

    storage.close().await
}
