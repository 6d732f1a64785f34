// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message CRUD and similarity search operations.

use anamnesis_core::types::{blob_to_vec, cosine_similarity, vec_to_blob, ChatRole};
use anamnesis_core::{AnamnesisError, ScoredMessage};
use rusqlite::params;

use crate::database::Database;
use crate::models::MessageRecord;

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, role, content, citations, search_results, model, embedding, created_at";

/// Parse a JSON text column, attributing failures to the column index.
fn parse_json_col<T: serde::de::DeserializeOwned>(
    idx: usize,
    json: &str,
) -> Result<T, rusqlite::Error> {
    serde_json::from_str(json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRecord, rusqlite::Error> {
    let role: String = row.get(2)?;
    let citations: Option<String> = row.get(4)?;
    let citations = match citations {
        Some(json) => Some(parse_json_col(4, &json)?),
        None => None,
    };
    let search_results: Option<String> = row.get(5)?;
    let search_results = match search_results {
        Some(json) => Some(parse_json_col(5, &json)?),
        None => None,
    };
    let embedding: Option<Vec<u8>> = row.get(7)?;
    Ok(MessageRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: ChatRole::from_str_value(&role),
        content: row.get(3)?,
        citations,
        search_results,
        model: row.get(6)?,
        embedding: embedding.map(|blob| blob_to_vec(&blob)),
        created_at: row.get(8)?,
    })
}

/// Insert a new message and bump the conversation's updated_at timestamp.
pub async fn insert_message(db: &Database, msg: &MessageRecord) -> Result<(), AnamnesisError> {
    let citations = msg
        .citations
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| AnamnesisError::Storage { source: Box::new(e) })?;
    let search_results = msg
        .search_results
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| AnamnesisError::Storage { source: Box::new(e) })?;
    let embedding = msg.embedding.as_ref().map(|v| vec_to_blob(v));
    let msg = msg.clone();

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, role, content, citations, search_results, model, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    msg.id,
                    msg.conversation_id,
                    msg.role.as_str(),
                    msg.content,
                    citations,
                    search_results,
                    msg.model,
                    embedding,
                    msg.created_at,
                ],
            )?;
            tx.execute(
                "UPDATE conversations SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![msg.conversation_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get messages for a conversation in chronological order.
///
/// With a limit, returns the most recent `limit` messages, still oldest first.
pub async fn get_messages(
    db: &Database,
    conversation_id: &str,
    limit: Option<usize>,
) -> Result<Vec<MessageRecord>, AnamnesisError> {
    let conversation_id = conversation_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut messages = Vec::new();
            match limit {
                Some(lim) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1
                         ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                    ))?;
                    let rows =
                        stmt.query_map(params![conversation_id, lim as i64], |row| {
                            row_to_message(row)
                        })?;
                    for row in rows {
                        messages.push(row?);
                    }
                    // Rows came newest first; flip back to chronological.
                    messages.reverse();
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1
                         ORDER BY created_at ASC, rowid ASC"
                    ))?;
                    let rows = stmt.query_map(params![conversation_id], |row| {
                        row_to_message(row)
                    })?;
                    for row in rows {
                        messages.push(row?);
                    }
                }
            }
            Ok(messages)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Similarity search over a user's messages.
///
/// Scores every embedded message in the user's conversations against the
/// query embedding, keeps those at or above `threshold`, and returns the
/// top `limit` by score. A conversation id narrows the scope to that
/// single conversation.
pub async fn search_messages(
    db: &Database,
    user_id: &str,
    conversation_id: Option<&str>,
    query_embedding: &[f32],
    threshold: f32,
    limit: usize,
) -> Result<Vec<ScoredMessage>, AnamnesisError> {
    let user_id = user_id.to_string();
    let conversation_id = conversation_id.map(str::to_string);
    let query = query_embedding.to_vec();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.conversation_id, m.role, m.content, m.citations,
                        m.search_results, m.model, m.embedding, m.created_at
                 FROM messages m
                 JOIN conversations c ON m.conversation_id = c.id
                 WHERE c.user_id = ?1
                   AND (?2 IS NULL OR m.conversation_id = ?2)
                   AND m.embedding IS NOT NULL",
            )?;
            let rows =
                stmt.query_map(params![user_id, conversation_id], |row| row_to_message(row))?;

            let mut scored = Vec::new();
            for row in rows {
                let message = row?;
                if let Some(embedding) = &message.embedding {
                    let score = cosine_similarity(&query, embedding);
                    if score >= threshold {
                        scored.push(ScoredMessage { message, score });
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

/// Fetch up to `limit` messages stored without an embedding, oldest first.
pub async fn messages_missing_embedding(
    db: &Database,
    limit: usize,
) -> Result<Vec<MessageRecord>, AnamnesisError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE embedding IS NULL
                 ORDER BY created_at ASC, rowid ASC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit as i64], |row| row_to_message(row))?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            Ok(messages)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Set the embedding for a message that was stored without one.
pub async fn set_message_embedding(
    db: &Database,
    id: &str,
    embedding: &[f32],
) -> Result<(), AnamnesisError> {
    let id = id.to_string();
    let blob = vec_to_blob(embedding);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE messages SET embedding = ?1 WHERE id = ?2",
                params![blob, id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Conversation;
    use crate::queries::conversations::{get_conversation, insert_conversation};
    use serde_json::json;
    use tempfile::tempdir;

    async fn setup_db_with_conversation() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap(), true).await.unwrap();

        let conversation = Conversation {
            id: "conv-1".to_string(),
            user_id: "user-1".to_string(),
            title: "New Chat".to_string(),
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            updated_at: "2026-01-01T00:00:00.000Z".to_string(),
        };
        insert_conversation(&db, &conversation).await.unwrap();
        (db, dir)
    }

    fn make_msg(id: &str, role: ChatRole, content: &str, timestamp: &str) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            conversation_id: "conv-1".to_string(),
            role,
            content: content.to_string(),
            citations: None,
            search_results: None,
            model: None,
            embedding: None,
            created_at: timestamp.to_string(),
        }
    }

    #[tokio::test]
    async fn insert_and_get_messages_in_order() {
        let (db, _dir) = setup_db_with_conversation().await;

        let m1 = make_msg("m1", ChatRole::User, "hello", "2026-01-01T00:00:01.000Z");
        let m2 = make_msg("m2", ChatRole::Assistant, "hi there", "2026-01-01T00:00:02.000Z");
        let m3 = make_msg("m3", ChatRole::User, "how are you?", "2026-01-01T00:00:03.000Z");

        insert_message(&db, &m1).await.unwrap();
        insert_message(&db, &m2).await.unwrap();
        insert_message(&db, &m3).await.unwrap();

        let messages = get_messages(&db, "conv-1", None).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].id, "m1");
        assert_eq!(messages[1].id, "m2");
        assert_eq!(messages[2].id, "m3");
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[1].role, ChatRole::Assistant);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn get_messages_with_limit_returns_most_recent() {
        let (db, _dir) = setup_db_with_conversation().await;

        for i in 0..5 {
            let msg = make_msg(
                &format!("m{i}"),
                ChatRole::User,
                &format!("msg {i}"),
                &format!("2026-01-01T00:00:0{i}.000Z"),
            );
            insert_message(&db, &msg).await.unwrap();
        }

        let messages = get_messages(&db, "conv-1", Some(3)).await.unwrap();
        assert_eq!(messages.len(), 3);
        // Most recent three, oldest first.
        assert_eq!(messages[0].id, "m2");
        assert_eq!(messages[1].id, "m3");
        assert_eq!(messages[2].id, "m4");

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn assistant_extras_roundtrip() {
        let (db, _dir) = setup_db_with_conversation().await;

        let mut msg = make_msg(
            "m-extras",
            ChatRole::Assistant,
            "Lisinopril is an ACE inhibitor.",
            "2026-01-01T00:00:01.000Z",
        );
        msg.citations = Some(vec!["https://example.org/lisinopril".to_string()]);
        msg.search_results = Some(json!([{"title": "Lisinopril", "rank": 1}]));
        msg.model = Some("sonar-pro".to_string());
        msg.embedding = Some(vec![0.5, 0.5, 0.0]);

        insert_message(&db, &msg).await.unwrap();

        let messages = get_messages(&db, "conv-1", None).await.unwrap();
        assert_eq!(messages.len(), 1);
        let got = &messages[0];
        assert_eq!(
            got.citations,
            Some(vec!["https://example.org/lisinopril".to_string()])
        );
        assert_eq!(
            got.search_results,
            Some(json!([{"title": "Lisinopril", "rank": 1}]))
        );
        assert_eq!(got.model.as_deref(), Some("sonar-pro"));
        assert_eq!(got.embedding, Some(vec![0.5, 0.5, 0.0]));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn insert_message_touches_conversation() {
        let (db, _dir) = setup_db_with_conversation().await;
        let before = get_conversation(&db, "conv-1").await.unwrap().unwrap();

        let msg = make_msg("m1", ChatRole::User, "hello", "2026-01-01T00:00:01.000Z");
        insert_message(&db, &msg).await.unwrap();

        let after = get_conversation(&db, "conv-1").await.unwrap().unwrap();
        assert!(after.updated_at > before.updated_at);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn search_messages_thresholds_and_ranks() {
        let (db, _dir) = setup_db_with_conversation().await;

        let mut close = make_msg("m-close", ChatRole::User, "about my meds", "2026-01-01T00:00:01.000Z");
        close.embedding = Some(vec![1.0, 0.0, 0.0]);
        let mut near = make_msg("m-near", ChatRole::User, "dosage question", "2026-01-01T00:00:02.000Z");
        near.embedding = Some(vec![0.9, 0.1, 0.0]);
        let mut far = make_msg("m-far", ChatRole::User, "the weather", "2026-01-01T00:00:03.000Z");
        far.embedding = Some(vec![0.0, 0.0, 1.0]);
        let no_embedding = make_msg("m-none", ChatRole::User, "skipped", "2026-01-01T00:00:04.000Z");

        for m in [&close, &near, &far, &no_embedding] {
            insert_message(&db, m).await.unwrap();
        }

        let results = search_messages(&db, "user-1", None, &[1.0, 0.0, 0.0], 0.7, 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].message.id, "m-close");
        assert_eq!(results[1].message.id, "m-near");
        assert!(results[0].score > results[1].score);
        assert!(results.iter().all(|r| r.score >= 0.7));

        // Other users see nothing.
        let foreign = search_messages(&db, "user-2", None, &[1.0, 0.0, 0.0], 0.7, 10)
            .await
            .unwrap();
        assert!(foreign.is_empty());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn search_messages_scoped_to_conversation() {
        let (db, _dir) = setup_db_with_conversation().await;

        let other = Conversation {
            id: "conv-2".to_string(),
            user_id: "user-1".to_string(),
            title: "Second chat".to_string(),
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            updated_at: "2026-01-01T00:00:00.000Z".to_string(),
        };
        insert_conversation(&db, &other).await.unwrap();

        let mut in_first = make_msg("m-first", ChatRole::User, "meds", "2026-01-01T00:00:01.000Z");
        in_first.embedding = Some(vec![1.0, 0.0, 0.0]);
        let mut in_second = make_msg("m-second", ChatRole::User, "meds again", "2026-01-01T00:00:02.000Z");
        in_second.conversation_id = "conv-2".to_string();
        in_second.embedding = Some(vec![1.0, 0.0, 0.0]);

        insert_message(&db, &in_first).await.unwrap();
        insert_message(&db, &in_second).await.unwrap();

        let all = search_messages(&db, "user-1", None, &[1.0, 0.0, 0.0], 0.7, 10)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let scoped = search_messages(&db, "user-1", Some("conv-2"), &[1.0, 0.0, 0.0], 0.7, 10)
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].message.id, "m-second");

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn search_messages_respects_limit() {
        let (db, _dir) = setup_db_with_conversation().await;

        for i in 0..4 {
            let mut msg = make_msg(
                &format!("m{i}"),
                ChatRole::User,
                &format!("msg {i}"),
                &format!("2026-01-01T00:00:0{i}.000Z"),
            );
            msg.embedding = Some(vec![1.0, 0.0, 0.0]);
            insert_message(&db, &msg).await.unwrap();
        }

        let results = search_messages(&db, "user-1", None, &[1.0, 0.0, 0.0], 0.5, 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn backfill_queries_find_and_fill_missing_embeddings() {
        let (db, _dir) = setup_db_with_conversation().await;

        let mut with = make_msg("m-with", ChatRole::User, "embedded", "2026-01-01T00:00:01.000Z");
        with.embedding = Some(vec![0.1, 0.2]);
        let without = make_msg("m-without", ChatRole::User, "pending", "2026-01-01T00:00:02.000Z");

        insert_message(&db, &with).await.unwrap();
        insert_message(&db, &without).await.unwrap();

        let missing = messages_missing_embedding(&db, 10).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, "m-without");

        set_message_embedding(&db, "m-without", &[0.3, 0.4]).await.unwrap();

        let missing = messages_missing_embedding(&db, 10).await.unwrap();
        assert!(missing.is_empty());

        let messages = get_messages(&db, "conv-1", None).await.unwrap();
        let filled = messages.iter().find(|m| m.id == "m-without").unwrap();
        assert_eq!(filled.embedding, Some(vec![0.3, 0.4]));

        db.close().await.unwrap();
    }
}
