// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Anamnesis integration tests.
//!
//! Provides mock adapters and test harness infrastructure for fast,
//! deterministic, CI-runnable tests without external services.
//!
//! # Components
//!
//! - [`MockProvider`] - Mock extraction oracle with pre-configured responses
//! - [`MockEmbedder`] - Deterministic in-process embedding adapter
//! - [`TestHarness`] - Fully wired memory pipeline on a temp database

pub mod harness;
pub mod mock_embedder;
pub mod mock_provider;

pub use harness::TestHarness;
pub use mock_embedder::MockEmbedder;
pub use mock_provider::MockProvider;
