// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./anamnesis.toml` > `~/.config/anamnesis/anamnesis.toml` > `/etc/anamnesis/anamnesis.toml`
//! with environment variable overrides via `ANAMNESIS_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::AnamnesisConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/anamnesis/anamnesis.toml` (system-wide)
/// 3. `~/.config/anamnesis/anamnesis.toml` (user XDG config)
/// 4. `./anamnesis.toml` (local directory)
/// 5. `ANAMNESIS_*` environment variables
pub fn load_config() -> Result<AnamnesisConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AnamnesisConfig::default()))
        .merge(Toml::file("/etc/anamnesis/anamnesis.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("anamnesis/anamnesis.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("anamnesis.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env vars).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<AnamnesisConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AnamnesisConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<AnamnesisConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AnamnesisConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names. For example, `ANAMNESIS_STORAGE_DATABASE_PATH`
/// must map to `storage.database_path`, not `storage.database.path`.
fn env_provider() -> Env {
    Env::prefixed("ANAMNESIS_").map(|key| {
        // `key` is the lowercased env var name with prefix stripped.
        // Example: ANAMNESIS_STORAGE_DATABASE_PATH -> "storage_database_path"
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("service_", "service.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("memory_", "memory.", 1)
            .replacen("embedding_", "embedding.", 1)
            .replacen("sonar_", "sonar.", 1)
            .replacen("worker_", "worker.", 1);
        mapped.into()
    })
}
