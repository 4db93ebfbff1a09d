//! Engine error types

use relcat_client::CatalogError;
use relcat_types::{DeploymentId, SnapshotError};
use std::time::Duration;
use thiserror::Error;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("No free version after {attempts} attempts starting from '{seed}'")]
    VersionExhausted { seed: String, attempts: usize },

    #[error("Version allocation stopped making progress at '{candidate}'")]
    VersionNoProgress { candidate: String },

    #[error("Deployment {id} did not finish within {waited:?}")]
    DeployTimeout { id: DeploymentId, waited: Duration },

    #[error("Wait for deployment {0} was cancelled")]
    Cancelled(DeploymentId),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("Catalog did not return {0} after creating it")]
    Missing(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Catalog(e) if e.is_not_found())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
