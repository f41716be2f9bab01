use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, RuleEngineError};

/// How the normalizer reacts to details that drift from the per-code schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationMode {
    /// Fail validation with `DetailSchemaDrift`
    Strict,
    /// Log and pass the diagnostic through
    Production,
}

impl Default for NormalizationMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            NormalizationMode::Strict
        } else {
            NormalizationMode::Production
        }
    }
}

/// Engine-wide configuration, built once and passed by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Field names whose content the structural model cannot describe
    pub open_ended_regions: Vec<String>,
    /// Path prefixes known to disagree between model and documents
    pub shape_sensitive_paths: Vec<String>,
    pub normalization: NormalizationMode,
    /// Parameter keys that would let a rule pick its own error code
    pub forbidden_parameters: Vec<String>,
    /// Field holding the root collection of entries
    pub root_collection: String,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PerformanceConfig {
    pub max_concurrent_entries: usize,
    pub batch_size: usize,
    pub validation_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            open_ended_regions: vec!["extension".to_string(), "modifierExtension".to_string()],
            shape_sensitive_paths: Vec::new(),
            normalization: NormalizationMode::default(),
            forbidden_parameters: [
                "codeMap",
                "errorCodeMap",
                "diagnosticCodeMap",
                "codeSelector",
                "codeByValue",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            root_collection: "entry".to_string(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_entries: num_cpus::get(),
            batch_size: 16,
            validation_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn with_normalization(mut self, mode: NormalizationMode) -> Self {
        self.normalization = mode;
        self
    }

    pub fn with_shape_sensitive_path(mut self, prefix: impl Into<String>) -> Self {
        self.shape_sensitive_paths.push(prefix.into());
        self
    }

    pub fn with_performance_config(mut self, performance: PerformanceConfig) -> Self {
        self.performance = performance;
        self
    }

    pub fn is_open_ended(&self, field: &str) -> bool {
        self.open_ended_regions.iter().any(|r| r == field)
    }

    pub fn is_forbidden_parameter(&self, name: &str) -> bool {
        self.forbidden_parameters.iter().any(|p| p == name)
    }

    fn validate(&self) -> Result<()> {
        if self.root_collection.trim().is_empty() {
            return Err(RuleEngineError::configuration("rootCollection must not be empty"));
        }
        if self.performance.batch_size == 0 {
            return Err(RuleEngineError::configuration("performance.batchSize must be positive"));
        }
        if self.performance.max_concurrent_entries == 0 {
            return Err(RuleEngineError::configuration(
                "performance.maxConcurrentEntries must be positive",
            ));
        }
        Ok(())
    }
}

impl PerformanceConfig {
    /// Single batch, no deadline
    pub fn sequential() -> Self {
        Self {
            max_concurrent_entries: 1,
            batch_size: usize::MAX,
            validation_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.is_open_ended("extension"));
        assert!(config.is_open_ended("modifierExtension"));
        assert!(config.is_forbidden_parameter("codeMap"));
        assert_eq!(config.root_collection, "entry");
        assert!(config.performance.max_concurrent_entries >= 1);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"shapeSensitivePaths": ["component.value"], "normalization": "production"}"#,
        )
        .unwrap();
        assert_eq!(config.shape_sensitive_paths, vec!["component.value"]);
        assert_eq!(config.normalization, NormalizationMode::Production);
        assert!(config.is_open_ended("extension"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(EngineConfig::from_json_str(r#"{"rootCollection": " "}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"performance": {"batchSize": 0}}"#).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"rootCollection": "items"}}"#).unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.root_collection, "items");
    }
}
