// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Account-level data operations: full purge and guest-to-account transfer.

use anamnesis_core::types::now_timestamp;
use anamnesis_core::{AnamnesisError, EntityUpdate};
use rusqlite::params;

use crate::database::Database;
use crate::queries::entities::{row_to_entity, ENTITY_COLUMNS};

/// Delete everything a user owns: conversations, their messages, and all
/// extracted entities, in one transaction.
pub async fn purge_user_data(db: &Database, user_id: &str) -> Result<(), AnamnesisError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM messages WHERE conversation_id IN
                 (SELECT id FROM conversations WHERE user_id = ?1)",
                params![user_id],
            )?;
            tx.execute("DELETE FROM conversations WHERE user_id = ?1", params![user_id])?;
            tx.execute("DELETE FROM entities WHERE user_id = ?1", params![user_id])?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Re-own all of `from_user`'s data to `to_user` in one transaction.
///
/// Conversations (and their messages, which follow the conversation) move
/// wholesale. Entities move too, except where the target already holds the
/// same identity key: those are merged into the target record and the
/// source record is dropped, so the one-record-per-key rule survives the
/// transfer.
pub async fn transfer_user_data(
    db: &Database,
    from_user: &str,
    to_user: &str,
) -> Result<(), AnamnesisError> {
    let from_user = from_user.to_string();
    let to_user = to_user.to_string();
    let now = now_timestamp();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "UPDATE conversations SET user_id = ?1 WHERE user_id = ?2",
                params![to_user, from_user],
            )?;

            let mut sources = Vec::new();
            {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities WHERE user_id = ?1"
                ))?;
                let rows = stmt.query_map(params![from_user], |row| row_to_entity(row))?;
                for row in rows {
                    sources.push(row?);
                }
            }

            for source in sources {
                let target = match tx.query_row(
                    &format!(
                        "SELECT {ENTITY_COLUMNS} FROM entities
                         WHERE user_id = ?1 AND entity_type = ?2 AND entity_name = ?3"
                    ),
                    params![to_user, source.entity_type, source.entity_name],
                    |row| row_to_entity(row),
                ) {
                    Ok(entity) => Some(entity),
                    Err(rusqlite::Error::QueryReturnedNoRows) => None,
                    Err(e) => return Err(e),
                };

                match target {
                    Some(mut target) => {
                        target.merge(
                            EntityUpdate {
                                relationships: source.relationships,
                                metadata: source.metadata,
                            },
                            now.clone(),
                        );
                        let relationships = serde_json::to_string(&target.relationships)
                            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                        let metadata = serde_json::to_string(&target.metadata)
                            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                        tx.execute(
                            "UPDATE entities SET relationships = ?1, metadata = ?2, updated_at = ?3
                             WHERE id = ?4",
                            params![relationships, metadata, now, target.id],
                        )?;
                        tx.execute("DELETE FROM entities WHERE id = ?1", params![source.id])?;
                    }
                    None => {
                        tx.execute(
                            "UPDATE entities SET user_id = ?1 WHERE id = ?2",
                            params![to_user, source.id],
                        )?;
                    }
                }
            }

            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}
