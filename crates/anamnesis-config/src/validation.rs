// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as threshold ranges, positive limits, and non-empty paths.

use crate::diagnostic::ConfigError;
use crate::model::AnamnesisConfig;

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &AnamnesisConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // Validate log level is a recognized value
    if !VALID_LOG_LEVELS.contains(&config.service.log_level.as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "service.log_level must be one of {}, got `{}`",
                VALID_LOG_LEVELS.join(", "),
                config.service.log_level
            ),
        });
    }

    // Validate database_path is not empty
    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    // Validate similarity thresholds are in [0, 1]
    check_threshold(
        &mut errors,
        "memory.memory_search_threshold",
        config.memory.memory_search_threshold,
    );
    check_threshold(
        &mut errors,
        "memory.message_search_threshold",
        config.memory.message_search_threshold,
    );

    // Validate limits and batch sizes are positive
    if config.memory.memory_search_limit == 0 {
        errors.push(ConfigError::Validation {
            message: "memory.memory_search_limit must be at least 1".to_string(),
        });
    }

    if config.memory.message_search_limit == 0 {
        errors.push(ConfigError::Validation {
            message: "memory.message_search_limit must be at least 1".to_string(),
        });
    }

    if config.memory.backfill_batch_size == 0 {
        errors.push(ConfigError::Validation {
            message: "memory.backfill_batch_size must be at least 1".to_string(),
        });
    }

    if config.memory.extraction_timeout_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "memory.extraction_timeout_secs must be at least 1".to_string(),
        });
    }

    // Validate embedding settings
    if config.embedding.base_url.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "embedding.base_url must not be empty".to_string(),
        });
    }

    if config.embedding.dimensions == 0 {
        errors.push(ConfigError::Validation {
            message: "embedding.dimensions must be at least 1".to_string(),
        });
    }

    // Validate sonar settings
    if config.sonar.base_url.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "sonar.base_url must not be empty".to_string(),
        });
    }

    if !(0.0..=2.0).contains(&config.sonar.temperature) {
        errors.push(ConfigError::Validation {
            message: format!(
                "sonar.temperature must be between 0.0 and 2.0, got {}",
                config.sonar.temperature
            ),
        });
    }

    // Validate worker settings
    if config.worker.queue_capacity == 0 {
        errors.push(ConfigError::Validation {
            message: "worker.queue_capacity must be at least 1".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_threshold(errors: &mut Vec<ConfigError>, key: &str, value: f32) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(ConfigError::Validation {
            message: format!("{key} must be between 0.0 and 1.0, got {value}"),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = AnamnesisConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = AnamnesisConfig::default();
        config.storage.database_path = "".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("database_path"))));
    }

    #[test]
    fn out_of_range_threshold_fails_validation() {
        let mut config = AnamnesisConfig::default();
        config.memory.memory_search_threshold = 1.5;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("memory_search_threshold"))));
    }

    #[test]
    fn zero_search_limit_fails_validation() {
        let mut config = AnamnesisConfig::default();
        config.memory.memory_search_limit = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("memory_search_limit"))));
    }

    #[test]
    fn zero_queue_capacity_fails_validation() {
        let mut config = AnamnesisConfig::default();
        config.worker.queue_capacity = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("queue_capacity"))));
    }

    #[test]
    fn bad_log_level_fails_validation() {
        let mut config = AnamnesisConfig::default();
        config.service.log_level = "verbose".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("log_level"))));
    }

    #[test]
    fn valid_custom_config_passes() {
        let mut config = AnamnesisConfig::default();
        config.storage.database_path = "/tmp/test.db".to_string();
        config.memory.memory_search_threshold = 0.5;
        config.memory.message_search_limit = 20;
        config.sonar.temperature = 0.0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn multiple_errors_are_collected() {
        let mut config = AnamnesisConfig::default();
        config.storage.database_path = "".to_string();
        config.memory.backfill_batch_size = 0;
        config.embedding.dimensions = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn partial_toml_fills_defaults_and_validates() {
        let toml_str = r#"
[memory]
memory_search_threshold = 0.9
"#;
        let config: AnamnesisConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.memory.memory_search_threshold, 0.9);
        assert_eq!(config.memory.memory_search_limit, 5);
        assert_eq!(config.service.log_level, "info");
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn unknown_key_rejected_at_deserialization() {
        let toml_str = r#"
[memory]
enabeld = true
"#;
        let result = toml::from_str::<AnamnesisConfig>(toml_str);
        assert!(result.is_err());
    }
}
