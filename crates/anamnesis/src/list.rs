// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `anamnesis list` - print a user's entity records.

use std::sync::Arc;

use anamnesis_config::AnamnesisConfig;
use anamnesis_core::{AnamnesisError, StorageAdapter};
use anamnesis_storage::SqliteStorage;

/// Prints the user's entity records, newest-updated first.
pub async fn run(
    config: &AnamnesisConfig,
    user_id: &str,
    limit: Option<usize>,
) -> Result<(), AnamnesisError> {
    let storage: Arc<dyn StorageAdapter> =
        Arc::new(SqliteStorage::new(config.storage.clone()));
    storage.initialize().await?;

    let mut entities = storage.list_entities(user_id).await?;
    if let Some(limit) = limit {
        entities.truncate(limit);
    }

    if entities.is_empty() {
        println!("no entities stored for {user_id}");
    }
    for entity in &entities {
        println!(
            "{} ({})  updated {}",
            entity.entity_name, entity.entity_type, entity.updated_at
        );
        if !entity.relationships.is_empty() {
            let rels = serde_json::Value::Array(entity.relationships.clone());
            println!("    relationships: {rels}");
        }
        if !entity.metadata.is_empty() {
            let meta = serde_json::Value::Object(entity.metadata.clone());
            println!("    metadata: {meta}");
        }
    }

    storage.close().await
}
