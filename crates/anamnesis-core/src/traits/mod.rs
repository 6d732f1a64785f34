// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions for the anamnesis backend seams.
//!
//! All adapters extend the [`Adapter`] base trait and use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod embedding;
pub mod provider;
pub mod storage;

// Re-export all traits at the traits module level for convenience.
pub use adapter::Adapter;
pub use embedding::EmbeddingAdapter;
pub use provider::ProviderAdapter;
pub use storage::StorageAdapter;
