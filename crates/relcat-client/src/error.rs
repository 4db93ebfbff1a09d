//! Catalog error types

use thiserror::Error;

/// Catalog errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Catalog returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Rejected by catalog: {0}")]
    Rejected(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Invalid catalog URL: {0}")]
    InvalidUrl(String),
}

/// Coarse classification used by callers deciding whether to continue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    TransportFailure,
    Rejected,
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Transport(_) | Self::Status { .. } | Self::Decode(_) | Self::InvalidUrl(_) => {
                ErrorKind::TransportFailure
            }
            Self::Rejected(_) | Self::Unauthorized(_) => ErrorKind::Rejected,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;
