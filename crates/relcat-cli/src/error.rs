//! CLI error types

use relcat_client::CatalogError;
use relcat_engine::EngineError;
use thiserror::Error;

/// CLI error types
#[derive(Debug, Error)]
pub enum CliError {
    /// Catalog request failed
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Resolution or deployment failed
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Object missing from the catalog
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Deployment ran and reported failure
    #[error("Deployment {0} failed")]
    DeploymentFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML output error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CliError {
    pub(crate) fn missing_arg(name: &str) -> Self {
        Self::InvalidInput(format!("--{name} is required"))
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
