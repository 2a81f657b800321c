pub mod adapter;
pub mod arr;
pub mod radarr;
pub mod sonarr;

use mediatrend_core::error::FailureKind;
use thiserror::Error;

pub use adapter::{Submitted, TargetAdapter};

#[derive(Error, Debug)]
pub enum TargetError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    /// Credentials rejected. Every further call would fail the same way.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Transport failure, timeout or server-side error.
    #[error("connection failed: {0}")]
    Connectivity(String),
    /// The target refused this particular title.
    #[error("rejected: {0}")]
    Validation(String),
}

impl TargetError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::NotConfigured(_) => FailureKind::TargetNotConfigured,
            Self::Auth(_) => FailureKind::TargetAuthFailed,
            Self::Connectivity(_) => FailureKind::TargetConnectivityFailed,
            Self::Validation(_) => FailureKind::TargetValidationFailed,
        }
    }

    /// Ends the whole job instead of just the current title.
    pub fn is_job_level(&self) -> bool {
        matches!(self, Self::NotConfigured(_) | Self::Auth(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}
