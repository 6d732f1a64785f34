// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! Do NOT create additional Connection instances for writes.

use anamnesis_core::AnamnesisError;
use tokio_rusqlite::Connection;
use tracing::debug;

/// Convert a tokio_rusqlite error into AnamnesisError::Storage.
pub fn map_tr_err(e: tokio_rusqlite::Error) -> AnamnesisError {
    AnamnesisError::Storage {
        source: Box::new(e),
    }
}

/// Handle to the SQLite database.
///
/// Owns the single `tokio_rusqlite::Connection` through which all queries
/// run. Opening the database applies PRAGMAs and runs pending migrations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn open(path: &str, wal_mode: bool) -> Result<Self, AnamnesisError> {
        let conn = Connection::open(path).await.map_err(|e| map_tr_err(e.into()))?;

        conn.call(move |conn| {
            let mut pragmas = String::new();
            if wal_mode {
                pragmas.push_str("PRAGMA journal_mode = WAL;\n");
            }
            pragmas.push_str(
                "PRAGMA synchronous = NORMAL;\n\
                 PRAGMA foreign_keys = ON;\n\
                 PRAGMA busy_timeout = 5000;",
            );
            conn.execute_batch(&pragmas)?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        let migration_result = conn
            .call(|conn| Ok(crate::migrations::run_migrations(conn)))
            .await
            .map_err(map_tr_err)?;
        migration_result?;

        debug!(path, wal_mode, "database opened");
        Ok(Self { conn })
    }

    /// Returns the underlying connection handle.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Checkpoint the WAL and close the connection.
    pub async fn close(self) -> Result<(), AnamnesisError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        self.conn.close().await.map_err(map_tr_err)
    }
}
