//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! bed_ids = ["R1", "R2", "NEO1"]
//! remote_enabled = true
//! database_path = "/var/lib/census/cache.db"
//!
//! [retry]
//! max_retries = 3
//! initial_delay_ms = 1000
//!
//! [logging]
//! level = "info"
//! dir = "/var/log/census"
//! ```
//!
//! Every field is optional; missing ones take their defaults.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The hospital's beds: ICU rooms, neonatal cribs, then the ward rooms.
pub const DEFAULT_BED_IDS: &[&str] = &[
    "R1", "R2", "R3", "R4", "NEO1", "NEO2", "H1C1", "H1C2", "H2C1", "H2C2", "H3C1", "H3C2",
    "H4C1", "H4C2", "H5C1", "H5C2", "H6C1", "H6C2",
];

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Retry budget for remote calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: usize,
    pub initial_delay_ms: u64,
    pub backoff_factor: f32,
    pub max_delay_ms: u64,
    /// Randomize delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            jitter: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Log directory; file logging is off when unset
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Beds every daily record must contain
    pub bed_ids: Vec<String>,
    pub retry: RetryConfig,
    /// Bound of the background patch queue
    pub patch_queue_capacity: usize,
    /// Initial remote routing switch
    pub remote_enabled: bool,
    /// Start in the demo namespace
    pub demo_mode: bool,
    /// Local cache file; in memory when unset
    pub database_path: Option<PathBuf>,
    pub logging: LoggingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            bed_ids: DEFAULT_BED_IDS.iter().map(|s| s.to_string()).collect(),
            retry: RetryConfig::default(),
            patch_queue_capacity: 256,
            remote_enabled: true,
            demo_mode: false,
            database_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        let config: SyncConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.bed_ids.is_empty() {
            return Err(ConfigError::Invalid("bed_ids cannot be empty".into()));
        }
        let mut seen = HashSet::new();
        for bed_id in &self.bed_ids {
            if bed_id.trim().is_empty() || bed_id.contains('.') {
                return Err(ConfigError::Invalid(format!("invalid bed id `{}`", bed_id)));
            }
            if !seen.insert(bed_id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate bed id `{}`", bed_id)));
            }
        }
        if !(self.retry.backoff_factor >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_factor must be >= 1, got {}",
                self.retry.backoff_factor
            )));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms must not be below retry.initial_delay_ms".into(),
            ));
        }
        if self.patch_queue_capacity == 0 {
            return Err(ConfigError::Invalid("patch_queue_capacity must be at least 1".into()));
        }
        crate::logging::normalize_level(&self.logging.level)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}
