//! Curator configuration loaded from `curator.toml`.
//!
//! ```toml
//! dataset_root = "Dataset"
//! total_count = 200
//! batch_size = 20
//! threshold = 0.85
//!
//! [source]
//! base_url = "https://api.thecatapi.com/v1/images/search"
//!
//! [classifier]
//! models_dir = ".vendor/models"
//! ```

use crate::classifier::ClassifierConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "curator.toml";

/// Smallest batch size a run accepts.
pub const MIN_BATCH_SIZE: usize = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadingMode {
    #[default]
    Parallel,
    Sequential,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid config TOML in {}: {source}", .path.display())]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("batch size {actual} is below the minimum of {minimum}")]
    BatchSizeTooSmall { actual: usize, minimum: usize },
    #[error("threshold {0} must be between 0.0 and 1.0")]
    InvalidThreshold(f32),
    #[error("no supported image extensions configured")]
    NoExtensions,
    #[error("max_retries must be at least 1")]
    ZeroRetries,
}

/// Remote image source settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sent as `x-api-key` when present
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_base_url() -> String {
    "https://api.thecatapi.com/v1/images/search".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            api_key: None,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CuratorConfig {
    #[serde(default = "default_dataset_root")]
    pub dataset_root: PathBuf,
    #[serde(default = "default_pending_dir")]
    pub pending_dir: String,
    #[serde(default = "default_confirmed_dir")]
    pub confirmed_dir: String,
    /// Number of images to request over the whole run
    #[serde(default = "default_total_count")]
    pub total_count: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Page size used when paging through the source
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Attempts per fetch or download, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Optional JSON run report
    #[serde(default)]
    pub report_path: Option<PathBuf>,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

fn default_dataset_root() -> PathBuf {
    PathBuf::from("Dataset")
}

fn default_pending_dir() -> String {
    "Unverified".to_string()
}

fn default_confirmed_dir() -> String {
    "Verified".to_string()
}

fn default_total_count() -> usize {
    10
}

fn default_batch_size() -> usize {
    MIN_BATCH_SIZE
}

fn default_page_size() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    3
}

fn default_threshold() -> f32 {
    0.85
}

fn default_extensions() -> Vec<String> {
    vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()]
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            dataset_root: default_dataset_root(),
            pending_dir: default_pending_dir(),
            confirmed_dir: default_confirmed_dir(),
            total_count: default_total_count(),
            batch_size: default_batch_size(),
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            threshold: default_threshold(),
            extensions: default_extensions(),
            report_path: None,
            source: SourceConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl CuratorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            source,
            path: path.to_path_buf(),
        })
    }

    /// Load `curator.toml` from the working directory or `.vendor/`,
    /// falling back to defaults when neither exists.
    ///
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let candidates = [
            PathBuf::from(DEFAULT_CONFIG_FILE),
            PathBuf::from(".vendor").join(DEFAULT_CONFIG_FILE),
        ];
        for candidate in candidates {
            if candidate.exists() {
                return Self::load(candidate);
            }
        }
        Ok(Self::default())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            source,
            path: path.to_path_buf(),
        })
    }

    /// Checks the values a run depends on before any work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size < MIN_BATCH_SIZE {
            return Err(ConfigError::BatchSizeTooSmall {
                actual: self.batch_size,
                minimum: MIN_BATCH_SIZE,
            });
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.extensions.is_empty() {
            return Err(ConfigError::NoExtensions);
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Number of batches needed to request `total_count` images.
    pub fn batch_count(&self) -> usize {
        if self.batch_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(self.batch_size)
    }

    /// Extensions lowercased for comparison.
    pub fn normalized_extensions(&self) -> Vec<String> {
        self.extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_lowercase())
            .collect()
    }
}
