// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entity persistence: identity-keyed upserts, listing, and similarity search.

use anamnesis_core::types::{blob_to_vec, cosine_similarity, vec_to_blob};
use anamnesis_core::{AnamnesisError, ScoredEntity};
use rusqlite::params;

use crate::database::Database;
use crate::models::EntityRecord;

pub(crate) const ENTITY_COLUMNS: &str = "id, user_id, conversation_id, entity_type, entity_name, \
     relationships, metadata, embedding, created_at, updated_at";

fn parse_json_col<T: serde::de::DeserializeOwned>(
    idx: usize,
    json: &str,
) -> Result<T, rusqlite::Error> {
    serde_json::from_str(json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn row_to_entity(row: &rusqlite::Row<'_>) -> Result<EntityRecord, rusqlite::Error> {
    let relationships: String = row.get(5)?;
    let metadata: String = row.get(6)?;
    let embedding: Option<Vec<u8>> = row.get(7)?;
    Ok(EntityRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        conversation_id: row.get(2)?,
        entity_type: row.get(3)?,
        entity_name: row.get(4)?,
        relationships: parse_json_col(5, &relationships)?,
        metadata: parse_json_col(6, &metadata)?,
        embedding: embedding.map(|blob| blob_to_vec(&blob)),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Serialized form of an entity, ready to bind as SQL parameters.
struct EntityRow {
    id: String,
    user_id: String,
    conversation_id: Option<String>,
    entity_type: String,
    entity_name: String,
    relationships: String,
    metadata: String,
    embedding: Option<Vec<u8>>,
    created_at: String,
    updated_at: String,
}

fn to_row(entity: &EntityRecord) -> Result<EntityRow, AnamnesisError> {
    let relationships = serde_json::to_string(&entity.relationships)
        .map_err(|e| AnamnesisError::Storage { source: Box::new(e) })?;
    let metadata = serde_json::to_string(&entity.metadata)
        .map_err(|e| AnamnesisError::Storage { source: Box::new(e) })?;
    Ok(EntityRow {
        id: entity.id.clone(),
        user_id: entity.user_id.clone(),
        conversation_id: entity.conversation_id.clone(),
        entity_type: entity.entity_type.clone(),
        entity_name: entity.entity_name.clone(),
        relationships,
        metadata,
        embedding: entity.embedding.as_ref().map(|v| vec_to_blob(v)),
        created_at: entity.created_at.clone(),
        updated_at: entity.updated_at.clone(),
    })
}

/// Insert a new entity, or update the mutable fields of an existing one.
///
/// Matching is by record id. Identity fields (user, type, name) and
/// created_at are never rewritten on update. A fresh insert that collides
/// with an existing identity key fails on the unique index instead of
/// silently replacing the older record.
fn upsert_row(conn: &rusqlite::Connection, row: &EntityRow) -> Result<(), rusqlite::Error> {
    let exists = match conn.query_row(
        "SELECT 1 FROM entities WHERE id = ?1",
        params![row.id],
        |r| r.get::<_, i64>(0),
    ) {
        Ok(_) => true,
        Err(rusqlite::Error::QueryReturnedNoRows) => false,
        Err(e) => return Err(e),
    };

    if exists {
        conn.execute(
            "UPDATE entities SET relationships = ?1, metadata = ?2, embedding = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                row.relationships,
                row.metadata,
                row.embedding,
                row.updated_at,
                row.id,
            ],
        )?;
    } else {
        conn.execute(
            "INSERT INTO entities (id, user_id, conversation_id, entity_type, entity_name,
                                   relationships, metadata, embedding, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.id,
                row.user_id,
                row.conversation_id,
                row.entity_type,
                row.entity_name,
                row.relationships,
                row.metadata,
                row.embedding,
                row.created_at,
                row.updated_at,
            ],
        )?;
    }
    Ok(())
}

pub async fn upsert_entity(db: &Database, entity: &EntityRecord) -> Result<(), AnamnesisError> {
    let row = to_row(entity)?;
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            upsert_row(&tx, &row)?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Upsert a batch of entities in a single transaction.
///
/// All records land or none do, so a crash mid-batch never leaves a
/// half-consolidated turn behind.
pub async fn upsert_entities(db: &Database, entities: &[EntityRecord]) -> Result<(), AnamnesisError> {
    if entities.is_empty() {
        return Ok(());
    }
    let rows = entities.iter().map(to_row).collect::<Result<Vec<_>, _>>()?;
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            for row in &rows {
                upsert_row(&tx, row)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Look up an entity by its identity key. The comparison is exact and
/// case-sensitive.
pub async fn find_entity(
    db: &Database,
    user_id: &str,
    entity_type: &str,
    entity_name: &str,
) -> Result<Option<EntityRecord>, AnamnesisError> {
    let user_id = user_id.to_string();
    let entity_type = entity_type.to_string();
    let entity_name = entity_name.to_string();
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                &format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities
                     WHERE user_id = ?1 AND entity_type = ?2 AND entity_name = ?3"
                ),
                params![user_id, entity_type, entity_name],
                |row| row_to_entity(row),
            );
            match result {
                Ok(entity) => Ok(Some(entity)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List all entities for a user, most recently updated first.
pub async fn list_entities(db: &Database, user_id: &str) -> Result<Vec<EntityRecord>, AnamnesisError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTITY_COLUMNS} FROM entities WHERE user_id = ?1
                 ORDER BY updated_at DESC, rowid DESC"
            ))?;
            let rows = stmt.query_map(params![user_id], |row| row_to_entity(row))?;
            let mut entities = Vec::new();
            for row in rows {
                entities.push(row?);
            }
            Ok(entities)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn delete_entity(db: &Database, id: &str) -> Result<(), AnamnesisError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute("DELETE FROM entities WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Delete every entity belonging to a user. Returns how many were removed.
pub async fn delete_entities_for_user(db: &Database, user_id: &str) -> Result<usize, AnamnesisError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| {
            let count = conn.execute("DELETE FROM entities WHERE user_id = ?1", params![user_id])?;
            Ok(count)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Delete every entity first observed in a conversation. Returns how many
/// were removed.
pub async fn delete_entities_for_conversation(
    db: &Database,
    conversation_id: &str,
) -> Result<usize, AnamnesisError> {
    let conversation_id = conversation_id.to_string();
    db.connection()
        .call(move |conn| {
            let count = conn.execute(
                "DELETE FROM entities WHERE conversation_id = ?1",
                params![conversation_id],
            )?;
            Ok(count)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Similarity search over a user's entities.
pub async fn search_entities(
    db: &Database,
    user_id: &str,
    query_embedding: &[f32],
    threshold: f32,
    limit: usize,
) -> Result<Vec<ScoredEntity>, AnamnesisError> {
    let user_id = user_id.to_string();
    let query = query_embedding.to_vec();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTITY_COLUMNS} FROM entities
                 WHERE user_id = ?1 AND embedding IS NOT NULL"
            ))?;
            let rows = stmt.query_map(params![user_id], |row| row_to_entity(row))?;

            let mut scored = Vec::new();
            for row in rows {
                let entity = row?;
                if let Some(embedding) = &entity.embedding {
                    let score = cosine_similarity(&query, embedding);
                    if score >= threshold {
                        scored.push(ScoredEntity { entity, score });
                    }
                }
            }
            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            scored.truncate(limit);
            Ok(scored)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch up to `limit` entities stored without an embedding, oldest first.
pub async fn entities_missing_embedding(
    db: &Database,
    limit: usize,
) -> Result<Vec<EntityRecord>, AnamnesisError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTITY_COLUMNS} FROM entities WHERE embedding IS NULL
                 ORDER BY created_at ASC, rowid ASC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit as i64], |row| row_to_entity(row))?;
            let mut entities = Vec::new();
            for row in rows {
                entities.push(row?);
            }
            Ok(entities)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Set the embedding for an entity that was stored without one. Leaves
/// updated_at alone so backfill does not masquerade as new information.
pub async fn set_entity_embedding(
    db: &Database,
    id: &str,
    embedding: &[f32],
) -> Result<(), AnamnesisError> {
    let id = id.to_string();
    let blob = vec_to_blob(embedding);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE entities SET embedding = ?1 WHERE id = ?2",
                params![blob, id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}
