//! Run configuration
//!
//! Slicing bounds and the retry budget have no implicit values: they live here
//! as explicit knobs, with the defaults documented on each field.

use crate::anchor::AnchorVocabulary;
use crate::error::{Error, Result};
use crate::parallel::ParallelConfig;
use crate::project::OUTPUT_DIR;
use crate::slicer::SliceConfig;
use crate::verify::ToolchainSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub analysis: AnalysisConfig,
    pub verification: VerificationConfig,
    pub symbolic: SymbolicConfig,
}

/// Graph construction settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Slicing bounds
    pub slice: SliceConfig,
    /// Worker pool for parsing, analysis and slicing
    pub parallel: ParallelConfig,
    /// Vocabulary file; the built-in vocabulary when `None`
    pub vocabulary: Option<PathBuf>,
    /// Directory artifacts are written to (default: `outputs`)
    pub output_dir: PathBuf,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            slice: SliceConfig::default(),
            parallel: ParallelConfig::default(),
            vocabulary: None,
            output_dir: PathBuf::from(OUTPUT_DIR),
        }
    }
}

/// Verification settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Maximum attempts per job, first attempt included (default: 3)
    pub retry_budget: u32,
    /// Wall-clock budget of one test run in seconds (default: 300)
    pub test_timeout_secs: u64,
    /// Budget for acquiring a sandbox in seconds (default: 120)
    pub provision_timeout_secs: u64,
    /// Gas budget passed to the toolchain
    pub gas_limit: Option<u64>,
    /// Jobs verified at once by `verify_all` (default: 4)
    pub max_concurrent_jobs: usize,
    /// Pinned test toolchain
    pub toolchain: ToolchainSpec,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            test_timeout_secs: 300,
            provision_timeout_secs: 120,
            gas_limit: None,
            max_concurrent_jobs: 4,
            toolchain: ToolchainSpec::forge(),
        }
    }
}

impl VerificationConfig {
    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_secs)
    }
}

/// Symbolic corroboration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolicConfig {
    /// Consult the symbolic engine at all (default: false)
    pub enabled: bool,
    /// Engine budget in seconds (default: 120)
    pub timeout_secs: u64,
    /// Also consult it when dynamic testing only timed out (default: false)
    pub confirm_inconclusive: bool,
}

impl Default for SymbolicConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: 120,
            confirm_inconclusive: false,
        }
    }
}

impl SymbolicConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Parse and validate a JSON document; missing sections take their defaults
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(text).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json(&text)
    }

    /// Reject zero budgets and timeouts
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.analysis.slice.max_nodes == 0, "analysis.slice.max_nodes must be positive"),
            (
                self.analysis.parallel.max_parallelism == 0,
                "analysis.parallel.max_parallelism must be positive",
            ),
            (self.verification.retry_budget == 0, "verification.retry_budget must be positive"),
            (
                self.verification.test_timeout_secs == 0,
                "verification.test_timeout_secs must be positive",
            ),
            (
                self.verification.provision_timeout_secs == 0,
                "verification.provision_timeout_secs must be positive",
            ),
            (
                self.verification.max_concurrent_jobs == 0,
                "verification.max_concurrent_jobs must be positive",
            ),
            (
                self.verification.toolchain.program.trim().is_empty(),
                "verification.toolchain.program must be set",
            ),
            (self.symbolic.enabled && self.symbolic.timeout_secs == 0, "symbolic.timeout_secs must be positive"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(Error::ConfigError(message.to_string())),
            None => Ok(()),
        }
    }

    /// Configured vocabulary, or the shared built-in one
    pub fn load_vocabulary(&self) -> Result<Arc<AnchorVocabulary>> {
        match &self.analysis.vocabulary {
            Some(path) => Ok(Arc::new(AnchorVocabulary::from_file(path)?)),
            None => Ok(AnchorVocabulary::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_explicit() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.analysis.slice.max_depth, 8);
        assert_eq!(config.analysis.slice.max_nodes, 256);
        assert_eq!(config.verification.retry_budget, 3);
        assert_eq!(config.verification.toolchain.program, "forge");
        assert!(!config.symbolic.enabled);
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_json(
            r#"{"analysis": {"slice": {"max_depth": 2}},
                "verification": {"retry_budget": 5, "toolchain": {"version": "1.0.0"}}}"#,
        )
        .unwrap();
        assert_eq!(config.analysis.slice.max_depth, 2);
        assert_eq!(config.analysis.slice.max_nodes, 256);
        assert_eq!(config.verification.retry_budget, 5);
        assert_eq!(config.verification.toolchain.version.as_deref(), Some("1.0.0"));
        assert_eq!(config.verification.toolchain.program, "forge");
    }

    #[test]
    fn test_zero_budgets_are_rejected() {
        for text in [
            r#"{"verification": {"retry_budget": 0}}"#,
            r#"{"verification": {"test_timeout_secs": 0}}"#,
            r#"{"analysis": {"slice": {"max_nodes": 0}}}"#,
        ] {
            assert!(matches!(Config::from_json(text), Err(Error::ConfigError(_))), "{}", text);
        }
        assert!(Config::from_json("not json").is_err());
    }

    #[test]
    fn test_vocabulary_defaults_to_builtin() {
        let vocabulary = Config::default().load_vocabulary().unwrap();
        assert!(Arc::ptr_eq(&vocabulary, &AnchorVocabulary::builtin()));
    }
}
