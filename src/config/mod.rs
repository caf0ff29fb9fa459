//! Configuration management for the satchel engine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Floor for the periodic sync tick. Backoff relies on triggers being
/// coarse, so shorter intervals are clamped up to this.
pub const MIN_SYNC_INTERVAL_SECS: u64 = 30;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the hosted backend
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Path prefix identifying data/API requests
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Cache version identifier. Bumping it on deploy invalidates every
    /// store from older versions on the next activation.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// URLs belonging to the precached application shell
    #[serde(default)]
    pub static_manifest: Vec<String>,

    /// Path served as the offline fallback page for navigations
    #[serde(default = "default_offline_page")]
    pub offline_page: String,

    /// Engine data directory override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Local storage budget in bytes
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,

    /// Usage percentage that triggers a storage-pressure warning
    #[serde(default = "default_high_water_percent")]
    pub high_water_percent: u8,

    /// Seconds between periodic sync ticks
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Push delivery failures after which the subscription is dropped
    #[serde(default = "default_max_delivery_failures")]
    pub max_delivery_failures: u32,
}

fn default_backend_url() -> String {
    "https://backend.satchel.app".to_string()
}

fn default_api_prefix() -> String {
    "/api/".to_string()
}

fn default_cache_version() -> String {
    "v1".to_string()
}

fn default_offline_page() -> String {
    "/offline.html".to_string()
}

fn default_quota_bytes() -> u64 {
    256 * 1024 * 1024 // 256 MiB
}

fn default_high_water_percent() -> u8 {
    90
}

fn default_sync_interval_secs() -> u64 {
    60
}

fn default_max_delivery_failures() -> u32 {
    3
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::Invalid(
            "Could not determine home directory".to_string(),
        ))?;

        Ok(home.join(".satchel").join("config.yaml"))
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path()?)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound.into());
        }

        let contents = std::fs::read_to_string(&path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;

        Ok(config)
    }

    /// Load from an explicit path if given, from the default path if that
    /// exists, and fall back to defaults otherwise.
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from(PathBuf::from(p)),
            None => match Self::load() {
                Ok(config) => Ok(config),
                Err(crate::error::Error::Config(ConfigError::NotFound)) => Ok(Self::default()),
                Err(err) => Err(err),
            },
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::default_path()?)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SaveError(e.to_string()))?;

        std::fs::write(&path, contents)?;

        // Set file permissions to 600 on Unix systems
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(&path, perms)?;
        }

        Ok(())
    }

    /// Directory holding the cache and queue databases
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }

        let data_base = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
            .ok_or(crate::error::StorageError::NoDataDir)?;

        Ok(data_base.join("satchel"))
    }

    /// Periodic sync interval, clamped to the engine floor
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(MIN_SYNC_INTERVAL_SECS))
    }

    /// High-water mark as a fraction in [0, 1]
    pub fn high_water_fraction(&self) -> f64 {
        f64::from(self.high_water_percent.min(100)) / 100.0
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            api_prefix: default_api_prefix(),
            cache_version: default_cache_version(),
            static_manifest: Vec::new(),
            offline_page: default_offline_page(),
            data_dir: None,
            quota_bytes: default_quota_bytes(),
            high_water_percent: default_high_water_percent(),
            sync_interval_secs: default_sync_interval_secs(),
            max_delivery_failures: default_max_delivery_failures(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_prefix, "/api/");
        assert_eq!(config.cache_version, "v1");
        assert_eq!(config.high_water_percent, 90);
        assert!(config.static_manifest.is_empty());
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_sync_interval_clamped_to_floor() {
        let mut config = Config::default();
        config.sync_interval_secs = 5;
        assert_eq!(
            config.sync_interval(),
            Duration::from_secs(MIN_SYNC_INTERVAL_SECS)
        );

        config.sync_interval_secs = 120;
        assert_eq!(config.sync_interval(), Duration::from_secs(120));
    }

    #[test]
    fn test_high_water_fraction() {
        let mut config = Config::default();
        assert!((config.high_water_fraction() - 0.9).abs() < f64::EPSILON);

        // Out-of-range values clamp rather than exceeding 100%
        config.high_water_percent = 150;
        assert!((config.high_water_fraction() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = Config::default();
        config.backend_url = "https://staging.satchel.app".to_string();
        config.cache_version = "v7".to_string();
        config.static_manifest = vec!["/index.html".to_string(), "/app.js".to_string()];
        config.save_to(path.clone()).unwrap();

        let loaded = Config::load_from(path).unwrap();
        assert_eq!(loaded.backend_url, "https://staging.satchel.app");
        assert_eq!(loaded.cache_version, "v7");
        assert_eq!(loaded.static_manifest.len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = Config::load_from(dir.path().join("missing.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_data_dir_override() {
        let mut config = Config::default();
        config.data_dir = Some(PathBuf::from("/tmp/satchel-test"));
        assert_eq!(
            config.data_dir().unwrap(),
            PathBuf::from("/tmp/satchel-test")
        );
    }
}
