// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation CRUD operations.

use anamnesis_core::AnamnesisError;
use rusqlite::params;

use crate::database::Database;
use crate::models::Conversation;

/// Insert a new conversation row.
pub async fn insert_conversation(
    db: &Database,
    conversation: &Conversation,
) -> Result<(), AnamnesisError> {
    let conversation = conversation.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO conversations (id, user_id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    conversation.id,
                    conversation.user_id,
                    conversation.title,
                    conversation.created_at,
                    conversation.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a conversation by ID.
pub async fn get_conversation(
    db: &Database,
    id: &str,
) -> Result<Option<Conversation>, AnamnesisError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, created_at, updated_at
                 FROM conversations WHERE id = ?1",
            )?;
            let result = stmt.query_row(params![id], |row| {
                Ok(Conversation {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    title: row.get(2)?,
                    created_at: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            });
            match result {
                Ok(conversation) => Ok(Some(conversation)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List a user's conversations, most recently updated first.
pub async fn list_conversations(
    db: &Database,
    user_id: &str,
) -> Result<Vec<Conversation>, AnamnesisError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, created_at, updated_at
                 FROM conversations WHERE user_id = ?1
                 ORDER BY updated_at DESC",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok(Conversation {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    title: row.get(2)?,
                    created_at: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })?;
            let mut conversations = Vec::new();
            for row in rows {
                conversations.push(row?);
            }
            Ok(conversations)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Rename a conversation and bump its updated_at timestamp.
pub async fn rename_conversation(
    db: &Database,
    id: &str,
    title: &str,
) -> Result<(), AnamnesisError> {
    let id = id.to_string();
    let title = title.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE conversations SET title = ?1, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?2",
                params![title, id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Delete a conversation, its messages, and the entities it first produced.
///
/// The three deletes run in a single transaction so a failure leaves the
/// conversation fully intact.
pub async fn delete_conversation_cascade(db: &Database, id: &str) -> Result<(), AnamnesisError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM entities WHERE conversation_id = ?1", params![id])?;
            tx.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])?;
            tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}
