// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the anamnesis memory engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level anamnesis configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnamnesisConfig {
    /// Service identity and logging settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Memory extraction and retrieval settings.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Extraction-model provider settings.
    #[serde(default)]
    pub sonar: SonarConfig,

    /// Background worker settings.
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Service identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Display name of the service.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "anamnesis".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    "anamnesis.db".to_string()
}

fn default_wal_mode() -> bool {
    true
}

/// Memory extraction and retrieval configuration.
///
/// Controls per-turn entity consolidation, semantic search thresholds,
/// and embedding backfill batching.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Enable the memory system. When false, turns are stored but no
    /// extraction or retrieval occurs.
    #[serde(default = "default_memory_enabled")]
    pub enabled: bool,

    /// Seconds to wait for the extraction model before giving up on a turn.
    #[serde(default = "default_extraction_timeout_secs")]
    pub extraction_timeout_secs: u64,

    /// Minimum cosine similarity for entity retrieval (0.0-1.0).
    #[serde(default = "default_memory_search_threshold")]
    pub memory_search_threshold: f32,

    /// Maximum entities returned per retrieval.
    #[serde(default = "default_memory_search_limit")]
    pub memory_search_limit: usize,

    /// Minimum cosine similarity for message retrieval (0.0-1.0).
    #[serde(default = "default_message_search_threshold")]
    pub message_search_threshold: f32,

    /// Maximum messages returned per retrieval.
    #[serde(default = "default_message_search_limit")]
    pub message_search_limit: usize,

    /// Rows per batch when backfilling missing embeddings.
    #[serde(default = "default_backfill_batch_size")]
    pub backfill_batch_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: default_memory_enabled(),
            extraction_timeout_secs: default_extraction_timeout_secs(),
            memory_search_threshold: default_memory_search_threshold(),
            memory_search_limit: default_memory_search_limit(),
            message_search_threshold: default_message_search_threshold(),
            message_search_limit: default_message_search_limit(),
            backfill_batch_size: default_backfill_batch_size(),
        }
    }
}

fn default_memory_enabled() -> bool {
    true
}

fn default_extraction_timeout_secs() -> u64 {
    10
}

fn default_memory_search_threshold() -> f32 {
    0.7
}

fn default_memory_search_limit() -> usize {
    5
}

fn default_message_search_threshold() -> f32 {
    0.7
}

fn default_message_search_limit() -> usize {
    10
}

fn default_backfill_batch_size() -> usize {
    100
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding server.
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    /// Name of the embedding model to use.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// API key for the embedding server. `None` sends no Authorization header.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Dimensionality of the embedding vectors.
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum retries for transient HTTP failures.
    #[serde(default = "default_embedding_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            api_key: None,
            dimensions: default_embedding_dimensions(),
            timeout_secs: default_embedding_timeout_secs(),
            max_retries: default_embedding_max_retries(),
        }
    }
}

fn default_embedding_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_embedding_dimensions() -> usize {
    384
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

fn default_embedding_max_retries() -> u32 {
    3
}

/// Extraction-model provider configuration.
///
/// Points at a Perplexity-compatible chat completions API. The memory
/// engine uses it as the entity extraction oracle.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SonarConfig {
    /// API key. `None` requires environment variable override before use.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the chat completions API.
    #[serde(default = "default_sonar_base_url")]
    pub base_url: String,

    /// Model to use for entity extraction.
    #[serde(default = "default_extraction_model")]
    pub extraction_model: String,

    /// Maximum tokens to generate per extraction response.
    #[serde(default = "default_sonar_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature for extraction. Low values keep output parseable.
    #[serde(default = "default_sonar_temperature")]
    pub temperature: f32,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_sonar_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum retries for transient HTTP failures.
    #[serde(default = "default_sonar_max_retries")]
    pub max_retries: u32,
}

impl Default for SonarConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_sonar_base_url(),
            extraction_model: default_extraction_model(),
            max_tokens: default_sonar_max_tokens(),
            temperature: default_sonar_temperature(),
            timeout_secs: default_sonar_timeout_secs(),
            max_retries: default_sonar_max_retries(),
        }
    }
}

fn default_sonar_base_url() -> String {
    "https://api.perplexity.ai".to_string()
}

fn default_extraction_model() -> String {
    "sonar-pro".to_string()
}

fn default_sonar_max_tokens() -> u32 {
    1024
}

fn default_sonar_temperature() -> f32 {
    0.1
}

fn default_sonar_timeout_secs() -> u64 {
    30
}

fn default_sonar_max_retries() -> u32 {
    3
}

/// Background worker configuration.
///
/// Controls the queue that decouples chat turns from memory consolidation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Capacity of the turn queue. Submissions beyond this are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Seconds the worker gets to drain the queue on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_queue_capacity() -> usize {
    64
}

fn default_shutdown_grace_secs() -> u64 {
    5
}
