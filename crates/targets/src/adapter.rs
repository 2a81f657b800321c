use mediatrend_core::report::SubmissionOutcome;
use mediatrend_core::types::{CanonicalId, MediaType};
use serde::Serialize;

use crate::TargetError;

/// Successful result of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Added,
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityProfile {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootFolder {
    pub path: String,
    pub free_space: Option<u64>,
}

/// A library manager that acquires one kind of title.
///
/// `submit` is idempotent: a title already in the library is reported as
/// `AlreadyPresent` and never added twice.
#[async_trait::async_trait]
pub trait TargetAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn media_type(&self) -> MediaType;

    async fn submit(&self, id: &CanonicalId) -> Result<Submitted, TargetError>;

    async fn quality_profiles(&self) -> Result<Vec<QualityProfile>, TargetError>;

    async fn root_folders(&self) -> Result<Vec<RootFolder>, TargetError>;
}

impl From<Submitted> for SubmissionOutcome {
    fn from(s: Submitted) -> Self {
        match s {
            Submitted::Added => SubmissionOutcome::Added,
            Submitted::AlreadyPresent => SubmissionOutcome::AlreadyPresent,
        }
    }
}

impl From<&TargetError> for SubmissionOutcome {
    fn from(e: &TargetError) -> Self {
        SubmissionOutcome::Failed {
            kind: e.failure_kind(),
            reason: e.to_string(),
        }
    }
}
