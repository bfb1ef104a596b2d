//! Analyzer configuration
//!
//! Every field has a default, so a YAML file only needs the keys it changes:
//!
//! ```yaml
//! streaming_threshold_bytes: 5242880
//! memory_ceiling_bytes: 104857600
//! ```

use crate::error::{SheetcheckError, SheetcheckResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 10 MiB
pub const DEFAULT_STREAMING_THRESHOLD: u64 = 10 * 1024 * 1024;
/// 200 MiB
pub const DEFAULT_MEMORY_CEILING: u64 = 200 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Inputs of at least this many bytes take the streaming path
    pub streaming_threshold_bytes: u64,
    /// Resident memory above which the streaming watchdog releases spare buffers
    pub memory_ceiling_bytes: u64,
    /// Rows between two watchdog samples
    pub watchdog_interval_rows: u64,
    /// Formulas reading more references than this are flagged
    pub max_precedents: usize,
    /// Duplicate detection ignores values of this many characters or fewer
    pub duplicate_min_length: usize,
    /// Columns with fewer populated cells are not checked for mixed types
    pub mixed_type_min_cells: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            streaming_threshold_bytes: DEFAULT_STREAMING_THRESHOLD,
            memory_ceiling_bytes: DEFAULT_MEMORY_CEILING,
            watchdog_interval_rows: 1000,
            max_precedents: 10,
            duplicate_min_length: 3,
            mixed_type_min_cells: 5,
        }
    }
}

impl AnalyzerConfig {
    pub fn from_yaml_str(yaml: &str) -> SheetcheckResult<Self> {
        let config: AnalyzerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> SheetcheckResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> SheetcheckResult<()> {
        if self.watchdog_interval_rows == 0 {
            return Err(SheetcheckError::Config(
                "watchdog_interval_rows must be at least 1".to_string(),
            ));
        }
        if self.mixed_type_min_cells == 0 {
            return Err(SheetcheckError::Config(
                "mixed_type_min_cells must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.streaming_threshold_bytes, 10_485_760);
        assert_eq!(config.memory_ceiling_bytes, 209_715_200);
        assert_eq!(config.max_precedents, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = AnalyzerConfig::from_yaml_str("streaming_threshold_bytes: 1024\n").unwrap();
        assert_eq!(config.streaming_threshold_bytes, 1024);
        assert_eq!(config.duplicate_min_length, 3);
    }

    #[test]
    fn test_zero_watchdog_interval_rejected() {
        let result = AnalyzerConfig::from_yaml_str("watchdog_interval_rows: 0\n");
        assert!(matches!(result, Err(SheetcheckError::Config(_))));
    }

    #[test]
    fn test_bad_yaml_is_a_yaml_error() {
        let result = AnalyzerConfig::from_yaml_str("streaming_threshold_bytes: [1, 2]\n");
        assert!(matches!(result, Err(SheetcheckError::Yaml(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheetcheck.yaml");
        std::fs::write(&path, "max_precedents: 4\n").unwrap();
        let config = AnalyzerConfig::load(&path).unwrap();
        assert_eq!(config.max_precedents, 4);
    }
}
