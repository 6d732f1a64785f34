// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the anamnesis memory engine.
//!
//! This crate provides the foundational trait definitions, error types, and
//! domain types used throughout the anamnesis workspace. All backend
//! adapters implement traits defined here.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::AnamnesisError;
pub use types::{
    AdapterType, ChatMessage, ChatRole, CompletionRequest, CompletionResponse, Conversation,
    EmbeddingInput, EmbeddingOutput, EntityRecord, EntityUpdate, HealthStatus, MessageRecord,
    ScoredEntity, ScoredMessage,
};

// Re-export all adapter traits at crate root.
pub use traits::{Adapter, EmbeddingAdapter, ProviderAdapter, StorageAdapter};
