// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding adapter trait for vector embedding generation.

use async_trait::async_trait;

use crate::error::AnamnesisError;
use crate::traits::adapter::Adapter;
use crate::types::{EmbeddingInput, EmbeddingOutput};

/// Adapter for generating vector embeddings from text.
///
/// Embedding adapters power semantic search over stored messages and
/// patient memory by converting content into vector representations.
#[async_trait]
pub trait EmbeddingAdapter: Adapter {
    /// Generates embeddings for the given input.
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, AnamnesisError>;
}
