// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock embedding adapter for deterministic testing.
//!
//! `MockEmbedder` implements `EmbeddingAdapter` fully in process. The
//! default mode derives a small normalized vector from the text bytes,
//! so equal texts embed equally and similarity search behaves.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use anamnesis_core::types::{AdapterType, EmbeddingInput, EmbeddingOutput, HealthStatus};
use anamnesis_core::{Adapter, AnamnesisError, EmbeddingAdapter};

const MOCK_DIMENSIONS: usize = 8;

/// A mock embedding provider with deterministic output.
pub struct MockEmbedder {
    fixed: Option<Vec<f32>>,
    failing: bool,
    fail_substring: Option<String>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    /// Create an embedder deriving a deterministic vector per text.
    pub fn new() -> Self {
        Self {
            fixed: None,
            failing: false,
            fail_substring: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Create an embedder returning the same vector for every text.
    pub fn returning(vector: Vec<f32>) -> Self {
        Self {
            fixed: Some(vector),
            ..Self::new()
        }
    }

    /// Create an embedder whose every call fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    /// Fail only calls whose input contains `needle`, for partial-failure tests.
    pub fn fail_contains(mut self, needle: &str) -> Self {
        self.fail_substring = Some(needle.to_string());
        self
    }

    /// Number of `embed` calls received so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(fixed) = &self.fixed {
            return fixed.clone();
        }
        let mut components = [0.0f32; MOCK_DIMENSIONS];
        for (i, byte) in text.bytes().enumerate() {
            components[i % MOCK_DIMENSIONS] += f32::from(byte) / 255.0;
        }
        // Never zero-norm, even for empty text.
        components[0] += 1.0;
        let norm = components.iter().map(|c| c * c).sum::<f32>().sqrt();
        components.iter().map(|c| c / norm).collect()
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for MockEmbedder {
    fn name(&self) -> &str {
        "mock-embedder"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, AnamnesisError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), AnamnesisError> {
        Ok(())
    }
}

#[async_trait]
impl EmbeddingAdapter for MockEmbedder {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, AnamnesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.failing {
            return Err(AnamnesisError::Embedding {
                message: "mock embedder failure".to_string(),
                source: None,
            });
        }
        if let Some(needle) = &self.fail_substring
            && input.texts.iter().any(|text| text.contains(needle))
        {
            return Err(AnamnesisError::Embedding {
                message: format!("mock embedder failure on input containing {needle:?}"),
                source: None,
            });
        }

        let embeddings: Vec<Vec<f32>> =
            input.texts.iter().map(|text| self.vector_for(text)).collect();
        let dimensions = embeddings.first().map_or(MOCK_DIMENSIONS, Vec::len);
        Ok(EmbeddingOutput {
            embeddings,
            dimensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(texts: &[&str]) -> EmbeddingInput {
        EmbeddingInput {
            texts: texts.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn equal_texts_embed_equally() {
        let embedder = MockEmbedder::new();
        let a = embedder.embed(input(&["Lisinopril"])).await.unwrap();
        let b = embedder.embed(input(&["Lisinopril"])).await.unwrap();
        assert_eq!(a.embeddings, b.embeddings);
        assert_eq!(a.dimensions, MOCK_DIMENSIONS);
    }

    #[tokio::test]
    async fn different_texts_embed_differently() {
        let embedder = MockEmbedder::new();
        let a = embedder.embed(input(&["Lisinopril"])).await.unwrap();
        let b = embedder.embed(input(&["Metformin"])).await.unwrap();
        assert_ne!(a.embeddings, b.embeddings);
    }

    #[tokio::test]
    async fn vectors_are_normalized() {
        let embedder = MockEmbedder::new();
        let out = embedder.embed(input(&["anything at all"])).await.unwrap();
        let norm: f32 = out.embeddings[0].iter().map(|c| c * c).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn returning_mode_is_constant() {
        let embedder = MockEmbedder::returning(vec![1.0, 0.0, 0.0]);
        let out = embedder.embed(input(&["a", "b"])).await.unwrap();
        assert_eq!(out.embeddings, vec![vec![1.0, 0.0, 0.0], vec![1.0, 0.0, 0.0]]);
        assert_eq!(out.dimensions, 3);
    }

    #[tokio::test]
    async fn fail_contains_is_selective() {
        let embedder = MockEmbedder::new().fail_contains("Metformin");
        assert!(embedder.embed(input(&["Lisinopril"])).await.is_ok());
        assert!(embedder.embed(input(&["Metformin 500mg"])).await.is_err());
        assert_eq!(embedder.calls(), 2);
    }

    #[tokio::test]
    async fn failing_mode_counts_calls() {
        let embedder = MockEmbedder::failing();
        assert!(embedder.embed(input(&["x"])).await.is_err());
        assert_eq!(embedder.calls(), 1);
    }
}
