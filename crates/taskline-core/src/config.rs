use crate::error::Result;
use crate::store::StoreOptions;
use crate::version::{is_new_action_id_supported, Version};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up when no config path is given.
pub const DEFAULT_CONFIG_FILE: &str = "taskline.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// TxnConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnConfig {
    /// Attempts per transaction before giving up with excessive contention.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

// ---------------------------------------------------------------------------
// PruneConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneConfig {
    /// Finished history older than this is deleted. 0 disables the age limit.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
    /// Size budget for the actions collection. 0 disables the size limit.
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
}

fn default_max_age_hours() -> u64 {
    336
}

fn default_max_size_mb() -> u64 {
    5120
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            max_age_hours: default_max_age_hours(),
            max_size_mb: default_max_size_mb(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_model_uuid")]
    pub model_uuid: String,
    /// Lowest agent version in the fleet; decides which id scheme new
    /// actions get.
    #[serde(default = "default_agent_version")]
    pub agent_version: Version,
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default)]
    pub txn: TxnConfig,
    #[serde(default)]
    pub prune: PruneConfig,
}

fn default_model_uuid() -> String {
    "local".to_string()
}

fn default_agent_version() -> Version {
    Version::new(3, 0, 0)
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".taskline/taskline.redb")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_uuid: default_model_uuid(),
            agent_version: default_agent_version(),
            store_path: default_store_path(),
            txn: TxnConfig::default(),
            prune: PruneConfig::default(),
        }
    }
}

impl Config {
    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            model_uuid: self.model_uuid.clone(),
            max_txn_attempts: self.txn.max_attempts,
        }
    }

    pub fn prune_max_age(&self) -> Duration {
        Duration::from_secs(self.prune.max_age_hours.saturating_mul(3600))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.model_uuid.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "model_uuid must not be empty".to_string(),
            });
        } else if self.model_uuid.contains(':') {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("model_uuid '{}' must not contain ':'", self.model_uuid),
            });
        }

        if self.txn.max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "txn.max_attempts must be at least 1".to_string(),
            });
        } else if self.txn.max_attempts > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "txn.max_attempts={} (>10 is unusual)",
                    self.txn.max_attempts
                ),
            });
        }

        if self.prune.max_age_hours == 0 && self.prune.max_size_mb == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "prune.max_age_hours and prune.max_size_mb are both 0; \
                          prune will never delete anything"
                    .to_string(),
            });
        }

        if !is_new_action_id_supported(self.agent_version) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "agent_version {} predates sequence action ids; new actions get UUIDs",
                    self.agent_version
                ),
            });
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(&dir.path().join("taskline.yaml")).unwrap();
        assert_eq!(cfg.model_uuid, "local");
        assert_eq!(cfg.txn.max_attempts, 3);
        assert_eq!(cfg.prune.max_age_hours, 336);
        assert_eq!(cfg.prune.max_size_mb, 5120);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("taskline.yaml");
        std::fs::write(&path, "model_uuid: m1\nagent_version: 2.6.5\nprune:\n  max_size_mb: 10\n")
            .unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.model_uuid, "m1");
        assert_eq!(cfg.agent_version, Version::new(2, 6, 5));
        assert_eq!(cfg.prune.max_size_mb, 10);
        assert_eq!(cfg.prune.max_age_hours, 336);
        assert_eq!(cfg.prune_max_age(), Duration::from_secs(336 * 3600));
        assert_eq!(cfg.store_options().model_uuid, "m1");
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf/taskline.yaml");
        let mut cfg = Config::default();
        cfg.txn.max_attempts = 5;
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.txn.max_attempts, 5);
        assert_eq!(loaded.store_path, cfg.store_path);
    }

    #[test]
    fn validate_flags_bad_values() {
        let mut cfg = Config::default();
        cfg.model_uuid = String::new();
        cfg.txn.max_attempts = 0;
        cfg.prune.max_age_hours = 0;
        cfg.prune.max_size_mb = 0;
        cfg.agent_version = Version::new(2, 6, 0);
        let warnings = cfg.validate();
        let errors = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .count();
        assert_eq!(errors, 2);
        assert_eq!(warnings.len(), 4);
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("taskline.yaml");
        std::fs::write(&path, "txn: [not, a, map]").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
