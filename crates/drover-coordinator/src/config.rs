//! Configuration for Drover
//!
//! One frozen [`DroverConfig`] value is loaded at startup and handed to the
//! ledger, the coordinator, the workers and the evaluator. Every field has a
//! default, so a config file only needs the keys it changes.

use drover_gatekeeper::{EvaluatorConfig, GatekeeperError};
use drover_store::{LedgerOptions, SqliteLedger};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending key
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Evaluator thresholds or weights are invalid
    #[error("Invalid evaluator configuration: {0}")]
    Evaluator(#[from] GatekeeperError),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// `[ledger]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database file
    pub path: PathBuf,

    /// Failed tries before an entity is marked permanently failed
    pub max_attempts: u32,

    /// How long a writer waits for another process's lock (ms)
    pub busy_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("drover.db"),
            max_attempts: 3,
            busy_timeout_ms: 5_000,
        }
    }
}

impl LedgerConfig {
    /// Options for [`SqliteLedger`]
    pub fn options(&self) -> LedgerOptions {
        LedgerOptions {
            max_attempts: self.max_attempts,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    /// Open the configured ledger file
    pub fn open(&self) -> Result<SqliteLedger, crate::CoordinatorError> {
        SqliteLedger::open(&self.path, self.options())
            .map_err(|e| crate::CoordinatorError::Open(e.to_string()))
    }
}

/// `[coordinator]` section
///
/// # Examples
///
/// ```
/// use drover_coordinator::CoordinatorConfig;
///
/// // Default configuration (balanced)
/// let config = CoordinatorConfig::default();
/// assert_eq!(config.lease_duration_secs, 300);
///
/// // Short leases, frequent sweeps
/// let config = CoordinatorConfig::aggressive();
/// assert_eq!(config.lease_duration_secs, 60);
///
/// // Long leases, infrequent sweeps
/// let config = CoordinatorConfig::lenient();
/// assert_eq!(config.lease_duration_secs, 900);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Lease granted with every claim (seconds)
    pub lease_duration_secs: u64,

    /// How often expired leases are swept (seconds)
    pub sweep_interval_secs: u64,

    /// First idle backoff delay (ms)
    pub backoff_base_ms: u64,

    /// Longest idle backoff delay (ms)
    pub backoff_cap_ms: u64,

    /// Attempts for a ledger transition while storage is failing
    pub storage_retry_limit: u32,

    /// Force a durable checkpoint after this many transitions (0 disables)
    pub checkpoint_interval: u64,

    /// Escalation cycles before a still-flagged entity is exhausted
    pub max_cycles: u32,

    /// Send entities whose verdict asks for more data back to collection
    /// instead of straight to a rerun
    pub recollect_on_missing_evidence: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lease_duration_secs: 300,
            sweep_interval_secs: 30,
            backoff_base_ms: 100,
            backoff_cap_ms: 10_000,
            storage_retry_limit: 5,
            checkpoint_interval: 100,
            max_cycles: 3,
            recollect_on_missing_evidence: false,
        }
    }
}

impl CoordinatorConfig {
    /// Short leases and frequent sweeps
    ///
    /// Suitable for fast collectors where a dead worker should be noticed quickly.
    pub fn aggressive() -> Self {
        Self {
            lease_duration_secs: 60,
            sweep_interval_secs: 10,
            backoff_base_ms: 50,
            backoff_cap_ms: 2_000,
            checkpoint_interval: 50,
            ..Self::default()
        }
    }

    /// Long leases and infrequent sweeps
    ///
    /// Suitable for slow collectors or analyses that take minutes per entity.
    pub fn lenient() -> Self {
        Self {
            lease_duration_secs: 900,
            sweep_interval_secs: 120,
            backoff_base_ms: 500,
            backoff_cap_ms: 60_000,
            storage_retry_limit: 10,
            checkpoint_interval: 500,
            max_cycles: 5,
            ..Self::default()
        }
    }

    /// Lease as Duration
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    /// Sweep interval as Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Check ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_duration_secs == 0 {
            return Err(invalid("lease_duration_secs", "must be positive"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(invalid("sweep_interval_secs", "must be positive"));
        }
        if self.backoff_base_ms == 0 {
            return Err(invalid("backoff_base_ms", "must be positive"));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(invalid(
                "backoff_cap_ms",
                format!("{} is below backoff_base_ms {}", self.backoff_cap_ms, self.backoff_base_ms),
            ));
        }
        if self.storage_retry_limit == 0 {
            return Err(invalid("storage_retry_limit", "must be at least 1"));
        }
        if self.max_cycles == 0 {
            return Err(invalid("max_cycles", "must be at least 1"));
        }
        Ok(())
    }
}

/// `[worker]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pause between two entities (ms), to stay polite to collection sources
    pub pace_ms: u64,

    /// Stop once every registered entity has settled, or at once if none are
    pub exit_when_complete: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pace_ms: 0,
            exit_when_complete: true,
        }
    }
}

impl WorkerConfig {
    /// Pace as Duration
    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }
}

/// Complete configuration, one section per component
///
/// ```toml
/// [ledger]
/// path = "drover.db"
/// max_attempts = 3
///
/// [coordinator]
/// lease_duration_secs = 300
/// max_cycles = 3
///
/// [worker]
/// pace_ms = 250
///
/// [evaluator]
/// pass_threshold = 0.65
/// penalty_mode = "proportional"
///
/// [evaluator.rules.unused_evidence]
/// enabled = true
/// weight = 0.2
/// severity = "hard"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DroverConfig {
    /// Ledger storage
    pub ledger: LedgerConfig,
    /// Leases, backoff, maintenance and escalation
    pub coordinator: CoordinatorConfig,
    /// Collection workers
    pub worker: WorkerConfig,
    /// Confidence evaluator
    pub evaluator: EvaluatorConfig,
}

impl DroverConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: DroverConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        self.coordinator.validate()?;
        self.evaluator.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_domain::Severity;
    use drover_gatekeeper::PenaltyMode;

    #[test]
    fn test_default_config() {
        let config = DroverConfig::default();
        assert_eq!(config.ledger.max_attempts, 3);
        assert_eq!(config.coordinator.lease(), Duration::from_secs(300));
        assert_eq!(config.coordinator.max_cycles, 3);
        assert_eq!(config.coordinator.checkpoint_interval, 100);
        assert_eq!(config.worker.pace_ms, 0);
        assert_eq!(config.evaluator.pass_threshold, 0.65);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let aggressive = CoordinatorConfig::aggressive();
        let lenient = CoordinatorConfig::lenient();
        let default = CoordinatorConfig::default();

        assert!(aggressive.lease_duration_secs < default.lease_duration_secs);
        assert!(aggressive.sweep_interval() < default.sweep_interval());
        assert!(lenient.lease_duration_secs > default.lease_duration_secs);
        assert_eq!(lenient.max_cycles, 5);
        assert!(aggressive.validate().is_ok());
        assert!(lenient.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
            [ledger]
            path = "/var/lib/drover/ledger.db"

            [coordinator]
            lease_duration_secs = 120
            recollect_on_missing_evidence = true

            [worker]
            pace_ms = 250

            [evaluator]
            pass_threshold = 0.7
            penalty_mode = "proportional"

            [evaluator.rules.unused_evidence]
            enabled = true
            weight = 0.2
            severity = "hard"
        "#;

        let config = DroverConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.ledger.path, PathBuf::from("/var/lib/drover/ledger.db"));
        assert_eq!(config.ledger.max_attempts, 3);
        assert_eq!(config.coordinator.lease_duration_secs, 120);
        assert_eq!(config.coordinator.sweep_interval_secs, 30);
        assert!(config.coordinator.recollect_on_missing_evidence);
        assert_eq!(config.worker.pace(), Duration::from_millis(250));
        assert_eq!(config.evaluator.penalty_mode, PenaltyMode::Proportional);
        assert_eq!(config.evaluator.rules.unused_evidence.severity, Severity::Hard);
        assert_eq!(config.evaluator.rules.min_cited_sources, 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = DroverConfig::from_toml_str("[coordinator]\nlease_duration_secs = 0\n");
        assert!(matches!(
            config,
            Err(ConfigError::Invalid { field: "lease_duration_secs", .. })
        ));

        let config = DroverConfig::from_toml_str("[coordinator]\nmax_cycles = 0\n");
        assert!(matches!(config, Err(ConfigError::Invalid { field: "max_cycles", .. })));

        let config =
            DroverConfig::from_toml_str("[coordinator]\nbackoff_base_ms = 500\nbackoff_cap_ms = 100\n");
        assert!(matches!(config, Err(ConfigError::Invalid { field: "backoff_cap_ms", .. })));

        let config = DroverConfig::from_toml_str("[evaluator]\npass_threshold = 1.5\n");
        assert!(matches!(config, Err(ConfigError::Evaluator(_))));

        let config = DroverConfig::from_toml_str("[ledger]\nmax_attempts = 0\n");
        assert!(matches!(config, Err(ConfigError::Invalid { field: "max_attempts", .. })));
    }

    #[test]
    fn test_malformed_toml() {
        let config = DroverConfig::from_toml_str("[coordinator\nlease = ");
        assert!(matches!(config, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drover.toml");
        std::fs::write(&path, "[coordinator]\nmax_cycles = 4\n").unwrap();

        let config = DroverConfig::from_file(&path).unwrap();
        assert_eq!(config.coordinator.max_cycles, 4);

        let missing = DroverConfig::from_file(dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::FileRead(_))));
    }
}
