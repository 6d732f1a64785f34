// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Anamnesis memory engine.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a single-writer
//! concurrency model via `tokio-rusqlite`, and typed CRUD operations for
//! conversations, messages, and deduplicated patient-memory entities.

pub mod adapter;
pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod writer;

pub use adapter::SqliteStorage;
pub use database::Database;
pub use models::*;
