// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-writer documentation and enforcement.
//!
//! All writes in anamnesis-storage are serialized through `tokio-rusqlite`'s
//! single background thread. The `Database` struct IS the single writer.
//! Query modules accept `&Database` and call through `conn.call()`.
//!
//! **Do NOT create additional Connection instances for writes.**

// The single-writer pattern is enforced by design:
// - `Database` wraps a single `tokio_rusqlite::Connection`
// - All query functions accept `&Database` and use `database.connection().call()`
// - tokio-rusqlite serializes all closure calls on one background thread
// - This eliminates SQLITE_BUSY errors under concurrent access
//
// The consolidator adds a second layer on top for entity writes: a per-user
// async mutex, so read-merge-write cycles on the same user's entities never
// interleave. The unique index on (user_id, entity_type, entity_name) is the
// final backstop when a second process shares the database file.
