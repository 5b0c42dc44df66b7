//! Engine configuration, loaded from TOML.
//!
//! Every section is optional; missing keys take the defaults below.
//!
//! ```toml
//! [discovery]
//! priority_rule = "active_first"
//! cache_ttl_secs = 300
//!
//! [updater]
//! batch_size = 25
//! min_confidence = "medium"
//! ```

use std::path::{Path, PathBuf};

use recon_core::Confidence;
use serde::{Deserialize, Serialize};

use crate::backup::BackupFormat;
use crate::error::EngineError;

/// One year.
pub const MAX_TEMPORAL_WINDOW_HOURS: i64 = 8760;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub discovery: DiscoveryConfig,
    pub resolver: ResolverConfig,
    pub updater: UpdaterConfig,
    pub backup: BackupConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Ranking used when a competitor has several projects. Default: "active_first".
    pub priority_rule: String,
    /// Seconds a cached competitor lookup stays valid. Default: 300.
    pub cache_ttl_secs: u64,
    /// Maximum cached competitors. Default: 1024.
    pub cache_capacity: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            priority_rule: "active_first".to_string(),
            cache_ttl_secs: 300,
            cache_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Half-width of the creation-time window for the temporal strategy. Default: 24.
    pub temporal_window_hours: i64,
    /// Upper bound on concurrent resolutions. Default: 4.
    pub workers: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            temporal_window_hours: 24,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Rows per transaction. Default: 10.
    pub batch_size: usize,
    /// Resolutions below this level are skipped. Default: medium.
    pub min_confidence: Confidence,
    /// Record per-item failures and keep going instead of aborting. Default: true.
    pub continue_on_error: bool,
    /// Re-check project/competitor links right before writing. Default: true.
    pub validate_relationships: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            min_confidence: Confidence::Medium,
            continue_on_error: true,
            validate_relationships: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory receiving snapshot artifacts. Default: "backups".
    pub dir: PathBuf,
    /// Default: structured.
    pub format: BackupFormat,
    /// zstd-compress artifacts. Default: false.
    pub compress: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("backups"),
            format: BackupFormat::Structured,
            compress: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Runs touching more reports than this need `force_run`. Default: 1000.
    pub max_changes_without_force: u64,
    /// Install store-level integrity constraints after repairs. Default: true.
    pub apply_constraints: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_changes_without_force: 1000,
            apply_constraints: true,
        }
    }
}

impl ReconcileConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        let config: Self =
            toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.updater.batch_size == 0 {
            return Err(EngineError::Config("updater.batch_size must be at least 1".into()));
        }
        if self.updater.min_confidence == Confidence::Failed {
            return Err(EngineError::Config(
                "updater.min_confidence must be high, medium or low".into(),
            ));
        }
        if self.resolver.workers == 0 {
            return Err(EngineError::Config("resolver.workers must be at least 1".into()));
        }
        if self.resolver.temporal_window_hours < 0 {
            return Err(EngineError::Config(
                "resolver.temporal_window_hours cannot be negative".into(),
            ));
        }
        if self.resolver.temporal_window_hours > MAX_TEMPORAL_WINDOW_HOURS {
            return Err(EngineError::Config(format!(
                "resolver.temporal_window_hours cannot exceed {MAX_TEMPORAL_WINDOW_HOURS}"
            )));
        }
        Ok(())
    }
}
