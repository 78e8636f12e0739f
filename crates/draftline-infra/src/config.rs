//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory and deserializes it into
//! [`EngineConfig`]. Every field has a default, so a missing or partial file
//! is valid.

use std::path::{Path, PathBuf};

use draftline_types::config::EngineConfig;
use thiserror::Error;

use crate::filesystem;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Read and validate a config file. A missing file is an error here; see
/// [`load_engine_config`] for the lenient variant.
pub async fn read_engine_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = toml::from_str::<EngineConfig>(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    validate(&config)?;
    Ok(config)
}

/// Load `{data_dir}/config.toml`.
///
/// A missing file yields [`EngineConfig::default()`]. An unreadable, malformed
/// or invalid file logs a warning and also yields the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let path = filesystem::config_path(data_dir);
    match read_engine_config(&path).await {
        Ok(config) => config,
        Err(ConfigError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config.toml found, using defaults");
            EngineConfig::default()
        }
        Err(err) => {
            tracing::warn!(error = %err, "using default engine configuration");
            EngineConfig::default()
        }
    }
}

fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    for (name, retry) in [("retry", &config.retry), ("checkpoint_retry", &config.checkpoint_retry)] {
        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(ConfigError::Invalid(format!("{name}.max_delay_ms is below base_delay_ms")));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(ConfigError::Invalid(format!("{name}.jitter must be within 0.0..=1.0")));
        }
    }
    let context = &config.context;
    if !(context.summarize_ratio > 0.0 && context.summarize_ratio <= 1.0) {
        return Err(ConfigError::Invalid("context.summarize_ratio must be within (0.0, 1.0]".into()));
    }
    if context.summarization_threshold_factor < 1.0 {
        return Err(ConfigError::Invalid(
            "context.summarization_threshold_factor must be at least 1.0".into(),
        ));
    }
    if context.safety_multiplier <= 0.0 || context.fallback_tokens_per_word <= 0.0 {
        return Err(ConfigError::Invalid("context estimator factors must be positive".into()));
    }
    if config.step_timeout_secs == 0 {
        return Err(ConfigError::Invalid("step_timeout_secs must be positive".into()));
    }
    if config.max_steps_per_run == 0 {
        return Err(ConfigError::Invalid("max_steps_per_run must be positive".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.checkpoint_retry.base_delay_ms, 100);
    }

    #[tokio::test]
    async fn test_partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
max_steps_per_run = 20

[retry]
max_attempts = 5

[context]
default_context_size = 32000

[context.model_context_sizes]
"small-model" = 8000

[dependencies]
research = ["introduction", "solution_analysis"]
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.max_steps_per_run, 20);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.context.context_size("small-model"), 8_000);
        assert_eq!(config.context.context_size("other"), 32_000);
        assert_eq!(config.context.reserved_response_tokens, 4_096);
        assert_eq!(
            config.dependencies.dependents_of("research").collect::<Vec<_>>(),
            vec!["introduction", "solution_analysis"]
        );
        assert_eq!(config.step_timeout_secs, 300);
    }

    #[tokio::test]
    async fn test_malformed_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();
        assert_eq!(load_engine_config(tmp.path()).await, EngineConfig::default());

        let err = read_engine_config(&tmp.path().join("config.toml")).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_invalid_values_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(&path, "[retry]\nbase_delay_ms = 5000\nmax_delay_ms = 10\n")
            .await
            .unwrap();
        assert!(matches!(read_engine_config(&path).await, Err(ConfigError::Invalid(_))));
        assert_eq!(load_engine_config(tmp.path()).await, EngineConfig::default());
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error_when_strict() {
        let tmp = TempDir::new().unwrap();
        let err = read_engine_config(&tmp.path().join("nope.toml")).await.unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
