//! CLI configuration

use crate::error::{CliError, CliResult};
use relcat_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration, read from `relcat/config.toml` in the user config dir
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CliConfig {
    /// Catalog service URL
    pub url: Option<String>,

    /// Catalog user
    pub user: Option<String>,

    /// Seconds between deployment progress checks
    pub poll_interval_secs: Option<u64>,

    /// Seconds to wait for a deployment before giving up
    pub deploy_timeout_secs: Option<u64>,

    /// Upper bound on version candidates tried by one allocation
    pub max_version_attempts: Option<usize>,
}

impl CliConfig {
    /// Load configuration from file
    pub fn load(path: Option<&str>) -> CliResult<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            let config: CliConfig =
                toml::from_str(&contents).map_err(|e| CliError::Config(e.to_string()))?;
            Ok(config)
        } else {
            Ok(CliConfig::default())
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> CliResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CliError::Config("Cannot find config directory".into()))?;
        Ok(config_dir.join("relcat").join("config.toml"))
    }

    /// Engine settings with this file's overrides applied
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::default();
        if let Some(secs) = self.poll_interval_secs {
            engine.poll_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = self.deploy_timeout_secs {
            engine.deploy_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = self.max_version_attempts {
            engine.max_version_attempts = attempts;
        }
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert!(config.url.is_none());
        assert!(config.user.is_none());
        assert_eq!(config.engine_config(), EngineConfig::default());
    }

    #[test]
    fn test_load_missing_config() {
        let config = CliConfig::load(Some("/nonexistent/path/config.toml")).unwrap();
        assert!(config.url.is_none());
    }

    #[test]
    fn test_overrides_reach_engine() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "url = \"https://catalog.example.com\"\npoll_interval_secs = 2\ndeploy_timeout_secs = 60\nmax_version_attempts = 5"
        )
        .unwrap();

        let config = CliConfig::load(file.path().to_str()).unwrap();
        let engine = config.engine_config();

        assert_eq!(config.url.as_deref(), Some("https://catalog.example.com"));
        assert_eq!(engine.poll_interval, Duration::from_secs(2));
        assert_eq!(engine.deploy_timeout, Duration::from_secs(60));
        assert_eq!(engine.max_version_attempts, 5);
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "url = [").unwrap();

        let err = CliConfig::load(file.path().to_str()).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }
}
