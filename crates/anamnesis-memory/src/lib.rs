// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Patient-memory engine for the Anamnesis backend.
//!
//! Turns finished conversation turns into a deduplicated, queryable
//! store of structured health facts. Extraction runs through an LLM
//! oracle, embeddings come from an OpenAI-compatible HTTP server, and
//! everything is best-effort: memory failures degrade, they never fail
//! the chat turn that triggered them.
//!
//! ## Architecture
//!
//! - **EntityExtractor**: LLM-based entity extraction from a turn
//! - **Consolidator**: merge-or-create resolution into entity records
//! - **HttpEmbedder**: OpenAI-compatible `/v1/embeddings` client
//! - **Retriever**: similarity search over memory and message history
//! - **EmbeddingBackfill**: repair pass for rows missing a vector
//! - **MemoryWorker**: bounded background queue draining turns
//! - **Types**: ExtractedEntity, AssistantReply, canonical projections

pub mod backfill;
pub mod consolidator;
pub mod embedder;
pub mod extractor;
pub mod retriever;
pub mod types;
pub mod worker;

pub use backfill::EmbeddingBackfill;
pub use consolidator::Consolidator;
pub use embedder::HttpEmbedder;
pub use extractor::EntityExtractor;
pub use retriever::Retriever;
pub use types::*;
pub use worker::{MemoryWorker, TurnJob};
