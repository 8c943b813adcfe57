// SPDX-License-Identifier: MIT

//! Config loader - YAML file loading and parsing
//!
//! This module handles loading run configuration from YAML files and the
//! environment.

use std::env;
use std::fs;
use std::path::Path;

use super::config::RunConfig;
use crate::adk::error::BrigadeError;

/// Environment variable overriding the model name
pub const MODEL_ENV: &str = "BRIGADE_MODEL";

/// Loads run configuration from YAML files
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load from `path` if given, otherwise start from defaults; then apply
    /// environment overrides.
    pub fn load(&self, path: Option<&Path>) -> Result<RunConfig, BrigadeError> {
        let mut config = match path {
            Some(p) => self.load_file(p)?,
            None => RunConfig::default(),
        };
        Self::apply_env(&mut config);
        Ok(config)
    }

    /// Load a run configuration from a YAML file
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<RunConfig, BrigadeError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            BrigadeError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        log::info!("Loaded run config from {}", path.display());
        Self::parse_yaml(&content)
    }

    /// Parse a run configuration from a YAML string
    pub fn parse_yaml(content: &str) -> Result<RunConfig, BrigadeError> {
        if content.trim().is_empty() {
            return Ok(RunConfig::default());
        }
        let config: RunConfig = serde_yaml::from_str(content)?;
        config.bakery.retry.to_policy()?;
        config.bakery.validate()?;
        Ok(config)
    }

    fn apply_env(config: &mut RunConfig) {
        if let Ok(model) = env::var(MODEL_ENV) {
            if !model.trim().is_empty() {
                log::info!("Using model {} from {}", model, MODEL_ENV);
                config.model.name = model;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
model:
  name: gemini-2.5-pro
  temperature: 0.2
node_timeout_ms: 30000
bakery:
  retry:
    max_attempts: 5
    delay_ms: 0
    backoff_factor: 2.0
  tolerance:
    below: 5
  fault_probability: 0.2
  stage_latency_ms: 0
snapshot:
  busy_threshold: 40
"#;
        let config = ConfigLoader::parse_yaml(yaml).unwrap();
        assert_eq!(config.model.name, "gemini-2.5-pro");
        assert_eq!(config.model.temperature, Some(0.2));
        assert_eq!(config.node_timeout_ms, Some(30000));
        assert_eq!(config.bakery.retry.max_attempts, 5);
        assert_eq!(config.bakery.tolerance.below, 5.0);
        assert_eq!(config.bakery.fault_probability, 0.2);
        assert_eq!(config.snapshot.busy_threshold, 40.0);
        // untouched fields keep their defaults
        assert_eq!(config.snapshot.moderate_threshold, 20.0);
    }

    #[test]
    fn test_parse_partial_config() {
        let config = ConfigLoader::parse_yaml("bakery:\n  stage_latency_ms: 10\n").unwrap();
        assert_eq!(config.bakery.stage_latency_ms, 10);
        assert_eq!(config.bakery.retry.max_attempts, 3);
        assert_eq!(config.model.name, "gemini-2.5-flash");
    }

    #[test]
    fn test_parse_empty_config() {
        assert_eq!(ConfigLoader::parse_yaml("  \n").unwrap(), RunConfig::default());
    }

    #[test]
    fn test_invalid_retry_rejected() {
        let err = ConfigLoader::parse_yaml("bakery:\n  retry:\n    max_attempts: 0\n").unwrap_err();
        assert!(matches!(err, BrigadeError::Config(_)));
    }

    #[test]
    fn test_nan_fault_probability_rejected() {
        let err = ConfigLoader::parse_yaml("bakery:\n  fault_probability: .nan\n").unwrap_err();
        assert!(matches!(err, BrigadeError::Config(ref msg) if msg.contains("fault_probability")));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = ConfigLoader::parse_yaml("bakery: [unclosed").unwrap_err();
        assert!(matches!(err, BrigadeError::Yaml(_)));
    }

    #[test]
    fn test_load_file() {
        let path =
            std::env::temp_dir().join(format!("brigade-config-{}.yaml", uuid::Uuid::new_v4()));
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "snapshot:\n  moderate_threshold: 25").unwrap();

        let config = ConfigLoader::new().load_file(&path).unwrap();
        assert_eq!(config.snapshot.moderate_threshold, 25.0);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ConfigLoader::new()
            .load_file("/nonexistent/brigade.yaml")
            .unwrap_err();
        assert!(matches!(err, BrigadeError::Config(_)));
    }
}
