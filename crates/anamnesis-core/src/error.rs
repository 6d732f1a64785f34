// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the anamnesis memory engine.

use thiserror::Error;

/// The primary error type used across all anamnesis adapter traits and core operations.
#[derive(Debug, Error)]
pub enum AnamnesisError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Extraction-model provider errors (API failure, bad status, malformed body).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Embedding provider errors (API failure, bad status, malformed body).
    #[error("embedding error: {message}")]
    Embedding {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}
