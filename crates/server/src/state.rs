use std::sync::Arc;

use chrono::{DateTime, Utc};
use mediatrend_core::report::{JobFailure, ReportCounts, RunStatus, Trigger};
use sqlx::SqlitePool;

use crate::config_store::ConfigStore;
use crate::logs::LogBuffer;
use crate::scheduler::Scheduler;

/// Server-sent event types.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "job_started")]
    JobStarted {
        job: String,
        run_id: String,
        trigger: Trigger,
    },
    #[serde(rename = "job_finished")]
    JobFinished {
        job: String,
        run_id: String,
        status: RunStatus,
        counts: ReportCounts,
        failure: Option<JobFailure>,
    },
    #[serde(rename = "settings_changed")]
    SettingsChanged { revision: u64 },
    #[serde(rename = "heartbeat")]
    Heartbeat { seq: u64 },
}

pub type EventSender = tokio::sync::broadcast::Sender<ServerEvent>;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<ConfigStore>,
    pub scheduler: Arc<Scheduler>,
    pub logs: LogBuffer,
    pub events: EventSender,
    pub started_at: DateTime<Utc>,
}
