//! Engine configuration

use std::time::Duration;

/// Default upper bound on version candidates tried by one allocation
pub const DEFAULT_MAX_VERSION_ATTEMPTS: usize = 1000;

/// Default interval between deployment progress checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default time to wait for a deployment before giving up
pub const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Settings shared by every resolver. Built once per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Allocate a fresh component version when the requested one exists
    pub component_auto_increment: bool,

    /// Allocate a fresh application version when the requested one exists
    pub application_auto_increment: bool,

    pub max_version_attempts: usize,

    pub poll_interval: Duration,

    pub deploy_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            component_auto_increment: false,
            application_auto_increment: false,
            max_version_attempts: DEFAULT_MAX_VERSION_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            deploy_timeout: DEFAULT_DEPLOY_TIMEOUT,
        }
    }
}

impl EngineConfig {
    pub fn with_component_auto_increment(mut self, enabled: bool) -> Self {
        self.component_auto_increment = enabled;
        self
    }

    pub fn with_application_auto_increment(mut self, enabled: bool) -> Self {
        self.application_auto_increment = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(!config.component_auto_increment);
        assert_eq!(config.max_version_attempts, 1000);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.deploy_timeout, Duration::from_secs(1800));
    }
}
