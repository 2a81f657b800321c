pub mod matcher;
pub mod provider;
pub mod tmdb;

use mediatrend_core::error::FailureKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("metadata API key is not configured")]
    NotConfigured,
    #[error("authentication failed: {0}")]
    Unauthorized(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("not found")]
    NotFound,
}

impl MetadataError {
    /// Errors that will repeat for every title of a run.
    pub fn is_job_level(&self) -> bool {
        matches!(self, Self::NotConfigured | Self::Unauthorized(_))
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::NotConfigured => FailureKind::MetadataNotConfigured,
            Self::Unauthorized(_) => FailureKind::MetadataAuthFailed,
            _ => FailureKind::MetadataFailed,
        }
    }
}
