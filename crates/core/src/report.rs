use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;
use crate::types::{CanonicalId, JobKey};

/// What happened when a resolved title was handed to its library manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    Added,
    AlreadyPresent,
    Failed { kind: FailureKind, reason: String },
}

/// Final state of one title in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleStatus {
    Added,
    AlreadyPresent,
    Unresolved,
    Failed,
}

impl TitleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::AlreadyPresent => "already_present",
            Self::Unresolved => "unresolved",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "added" => Some(Self::Added),
            "already_present" => Some(Self::AlreadyPresent),
            "unresolved" => Some(Self::Unresolved),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Audit entry for a single title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleOutcome {
    pub rank: u32,
    pub raw_title: String,
    pub canonical: Option<CanonicalId>,
    pub status: TitleStatus,
    pub failure_kind: Option<FailureKind>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCounts {
    pub added: u32,
    pub already_present: u32,
    pub unresolved: u32,
    pub failed: u32,
}

/// A failure that ended a run before all titles were processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

/// Overall result of a run as shown to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::PartiallyFailed => "partially_failed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "partially_failed" => Some(Self::PartiallyFailed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one worker run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub run_id: String,
    pub job: JobKey,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: ReportCounts,
    pub titles: Vec<TitleOutcome>,
    pub failure: Option<JobFailure>,
}

impl JobReport {
    pub fn new(job: JobKey, trigger: Trigger, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            job,
            trigger,
            started_at,
            finished_at: None,
            counts: ReportCounts::default(),
            titles: Vec::new(),
            failure: None,
        }
    }

    pub fn record_unresolved(&mut self, rank: u32, raw_title: &str, reason: impl Into<String>) {
        self.counts.unresolved += 1;
        self.titles.push(TitleOutcome {
            rank,
            raw_title: raw_title.to_string(),
            canonical: None,
            status: TitleStatus::Unresolved,
            failure_kind: None,
            reason: Some(reason.into()),
        });
    }

    pub fn record_submission(
        &mut self,
        rank: u32,
        raw_title: &str,
        canonical: Option<CanonicalId>,
        outcome: SubmissionOutcome,
    ) {
        let (status, failure_kind, reason) = match outcome {
            SubmissionOutcome::Added => {
                self.counts.added += 1;
                (TitleStatus::Added, None, None)
            }
            SubmissionOutcome::AlreadyPresent => {
                self.counts.already_present += 1;
                (TitleStatus::AlreadyPresent, None, None)
            }
            SubmissionOutcome::Failed { kind, reason } => {
                self.counts.failed += 1;
                (TitleStatus::Failed, Some(kind), Some(reason))
            }
        };
        self.titles.push(TitleOutcome {
            rank,
            raw_title: raw_title.to_string(),
            canonical,
            status,
            failure_kind,
            reason,
        });
    }

    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) {
        self.failure = Some(JobFailure {
            kind,
            message: message.into(),
        });
    }

    pub fn finish(mut self, at: DateTime<Utc>) -> Self {
        self.finished_at = Some(at);
        self
    }

    pub fn status(&self) -> RunStatus {
        if self.failure.is_some() {
            RunStatus::Failed
        } else if self.finished_at.is_none() {
            RunStatus::Running
        } else if self.counts.failed > 0 {
            RunStatus::PartiallyFailed
        } else {
            RunStatus::Succeeded
        }
    }
}
