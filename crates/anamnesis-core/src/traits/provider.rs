// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider adapter trait for extraction-model integrations.

use async_trait::async_trait;

use crate::error::AnamnesisError;
use crate::traits::adapter::Adapter;
use crate::types::{CompletionRequest, CompletionResponse};

/// Adapter for language model provider integrations.
///
/// Provider adapters handle communication with completion APIs. The
/// memory engine uses them as its extraction oracle, so the contract is
/// a single-shot completion call.
#[async_trait]
pub trait ProviderAdapter: Adapter {
    /// Sends a completion request and returns the full response.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, AnamnesisError>;
}
