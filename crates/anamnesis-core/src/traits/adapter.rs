// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Base adapter trait that all backend adapters implement.

use async_trait::async_trait;

use crate::error::AnamnesisError;
use crate::types::{AdapterType, HealthStatus};

/// The base trait for all anamnesis backend adapters.
///
/// Every adapter (provider, storage, embedding) implements this trait,
/// which provides identity, lifecycle, and health check capabilities.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Returns the human-readable name of this adapter instance.
    fn name(&self) -> &str;

    /// Returns the type of adapter (provider, storage, embedding).
    fn adapter_type(&self) -> AdapterType;

    /// Performs a health check and returns the adapter's current status.
    async fn health_check(&self) -> Result<HealthStatus, AnamnesisError>;

    /// Gracefully shuts down the adapter, releasing any held resources.
    async fn shutdown(&self) -> Result<(), AnamnesisError>;
}
