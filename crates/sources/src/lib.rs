pub mod adapter;
pub mod browser;
pub mod countries;
pub mod flixpatrol;
pub mod netflix;
pub mod registry;
pub mod webdriver;

use mediatrend_core::error::FailureKind;
use thiserror::Error;

pub use adapter::SourceAdapter;
pub use registry::SourceRegistry;

#[derive(Error, Debug)]
pub enum SourceError {
    /// Network failure, timeout or an unexpected HTTP status.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// The page loaded but no longer has the expected structure.
    #[error("source format changed: {0}")]
    FormatChanged(String),
    /// No browser session could be obtained or driven.
    #[error("browser error: {0}")]
    Browser(String),
}

impl SourceError {
    /// Only transient fetch failures are worth another attempt in the same run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Unavailable(_) | Self::Browser(_) => FailureKind::SourceUnavailable,
            Self::FormatChanged(_) => FailureKind::SourceFormatChanged,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}
