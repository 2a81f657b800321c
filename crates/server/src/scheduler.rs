//! Per-job trigger bookkeeping and dispatch.
//!
//! Every job carries its own next-fire instant. A periodic tick compares
//! those against the clock and dispatches due jobs, bounded by a semaphore.
//! A job is marked running from dispatch until its report comes back, and a
//! running job is never dispatched again, whether by a tick or by "run now".

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use futures::FutureExt;
use mediatrend_core::config::{Configuration, JobDefinition};
use mediatrend_core::report::{JobReport, RunStatus, Trigger};
use mediatrend_core::schedule::Schedule;
use mediatrend_core::types::{JobKey, MediaType};
use mediatrend_db::repo::runs::RunRow;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config_store::ConfigStore;

/// Executes one run of a job. Failures are carried in the report.
#[async_trait::async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &JobKey, trigger: Trigger) -> JobReport;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("job '{0}' not found")]
    JobNotFound(String),
    #[error("job '{0}' is already running")]
    AlreadyRunning(String),
    #[error("source of job '{0}' is disabled")]
    Disabled(String),
    #[error("scheduler is shutting down")]
    ShuttingDown,
}

/// Last completed run of a job, as recorded in run history.
#[derive(Debug, Clone)]
pub struct LastRun {
    pub job: JobKey,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub run_id: String,
}

impl LastRun {
    /// `None` for rows that are unfinished or no longer parse.
    pub fn from_row(row: RunRow) -> Option<Self> {
        Some(Self {
            job: row.job_key.parse().ok()?,
            finished_at: DateTime::from_timestamp(row.finished_ts?, 0)?,
            status: RunStatus::from_str(&row.status)?,
            run_id: row.id,
        })
    }
}

struct JobState {
    definition: JobDefinition,
    next_fire: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    last_status: Option<RunStatus>,
    last_run_id: Option<String>,
    running: bool,
    /// Removed from configuration while running; dropped when the run ends.
    retired: bool,
}

/// Job as shown by the API and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub key: String,
    pub platform: String,
    pub media_type: MediaType,
    pub country: String,
    pub enabled: bool,
    pub source_enabled: bool,
    pub schedule: Schedule,
    /// `None` while the job cannot fire.
    pub next_fire: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
    pub last_run_id: Option<String>,
    pub running: bool,
}

struct Limits {
    max_concurrent: usize,
    permits: Arc<Semaphore>,
    enabled_sources: Vec<String>,
}

impl Limits {
    fn source_enabled(&self, platform: &str) -> bool {
        self.enabled_sources
            .iter()
            .any(|s| s.eq_ignore_ascii_case(platform))
    }
}

pub struct Scheduler {
    runner: Arc<dyn JobRunner>,
    jobs: Mutex<BTreeMap<JobKey, JobState>>,
    limits: Mutex<Limits>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn JobRunner>, cfg: &Configuration) -> Arc<Self> {
        let max = cfg.scheduler.max_concurrent_jobs.max(1);
        let scheduler = Arc::new(Self {
            runner,
            jobs: Mutex::new(BTreeMap::new()),
            limits: Mutex::new(Limits {
                max_concurrent: max,
                permits: Arc::new(Semaphore::new(max)),
                enabled_sources: cfg.general.enabled_sources.clone(),
            }),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });
        scheduler.sync(cfg, Utc::now());
        scheduler
    }

    fn jobs(&self) -> MutexGuard<'_, BTreeMap<JobKey, JobState>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn limits(&self) -> MutexGuard<'_, Limits> {
        self.limits.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reconcile job state with a new configuration.
    ///
    /// Kept jobs retain their history; a job whose schedule changed or which
    /// was re-enabled gets a fresh next-fire. Jobs removed while running
    /// finish their run first.
    pub fn sync(&self, cfg: &Configuration, now: DateTime<Utc>) {
        {
            let mut limits = self.limits();
            let max = cfg.scheduler.max_concurrent_jobs.max(1);
            if max != limits.max_concurrent {
                info!(from = limits.max_concurrent, to = max, "concurrency limit changed");
                // Runs already holding permits of the old semaphore keep them.
                limits.permits = Arc::new(Semaphore::new(max));
                limits.max_concurrent = max;
            }
            limits.enabled_sources = cfg.general.enabled_sources.clone();
        }

        let mut jobs = self.jobs();
        let mut wanted = BTreeMap::new();
        for definition in &cfg.scheduler.jobs {
            wanted.insert(definition.key(), definition.clone());
        }

        for (key, definition) in &wanted {
            match jobs.get_mut(key) {
                Some(state) => {
                    let reschedule = state.definition.schedule != definition.schedule
                        || (!state.definition.enabled && definition.enabled);
                    if reschedule {
                        state.next_fire =
                            definition
                                .schedule
                                .initial_fire(now, state.last_run, &Local);
                    }
                    if state.definition.enabled && !definition.enabled && state.running {
                        info!(job = %key, "job disabled while running, current run continues");
                    }
                    state.definition = definition.clone();
                    state.retired = false;
                }
                None => {
                    debug!(job = %key, "job added");
                    jobs.insert(
                        key.clone(),
                        JobState {
                            next_fire: definition.schedule.initial_fire(now, None, &Local),
                            definition: definition.clone(),
                            last_run: None,
                            last_status: None,
                            last_run_id: None,
                            running: false,
                            retired: false,
                        },
                    );
                }
            }
        }

        jobs.retain(|key, state| {
            if wanted.contains_key(key) {
                return true;
            }
            if state.running {
                state.retired = true;
                true
            } else {
                debug!(job = %key, "job removed");
                false
            }
        });
    }

    /// Seed last-run information from run history.
    pub fn seed_history(&self, history: impl IntoIterator<Item = LastRun>, now: DateTime<Utc>) {
        let mut jobs = self.jobs();
        for last in history {
            if let Some(state) = jobs.get_mut(&last.job) {
                state.last_run = Some(last.finished_at);
                state.last_status = Some(last.status);
                state.last_run_id = Some(last.run_id);
                state.next_fire = state
                    .definition
                    .schedule
                    .initial_fire(now, Some(last.finished_at), &Local);
            }
        }
    }

    /// Dispatch every enabled, idle job whose next-fire is not after `now`.
    pub fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<JobKey> {
        if self.cancel.is_cancelled() {
            return Vec::new();
        }
        let limits = self.limits();
        let mut due = Vec::new();
        {
            let mut jobs = self.jobs();
            for (key, state) in jobs.iter_mut() {
                if !state.definition.enabled
                    || state.retired
                    || state.running
                    || state.next_fire > now
                    || !limits.source_enabled(&key.platform)
                {
                    continue;
                }
                state.running = true;
                state.next_fire = state.definition.schedule.next_fire_after(now, &Local);
                due.push(key.clone());
            }
        }
        let permits = limits.permits.clone();
        drop(limits);

        for key in &due {
            self.spawn_run(key.clone(), Trigger::Scheduled, permits.clone());
        }
        due
    }

    /// Start a run outside the schedule. The job's next-fire is unchanged.
    pub fn run_now(self: &Arc<Self>, key: &JobKey) -> Result<(), SchedulerError> {
        if self.cancel.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }
        let limits = self.limits();
        {
            let mut jobs = self.jobs();
            let state = jobs
                .get_mut(key)
                .filter(|s| !s.retired)
                .ok_or_else(|| SchedulerError::JobNotFound(key.to_string()))?;
            if state.running {
                return Err(SchedulerError::AlreadyRunning(key.to_string()));
            }
            if !limits.source_enabled(&key.platform) {
                return Err(SchedulerError::Disabled(key.to_string()));
            }
            state.running = true;
        }
        let permits = limits.permits.clone();
        drop(limits);

        self.spawn_run(key.clone(), Trigger::Manual, permits);
        Ok(())
    }

    fn spawn_run(self: &Arc<Self>, key: JobKey, trigger: Trigger, permits: Arc<Semaphore>) {
        let this = Arc::clone(self);
        self.tracker.spawn(async move {
            let permit = tokio::select! {
                permit = permits.acquire_owned() => permit.ok(),
                _ = this.cancel.cancelled() => None,
            };
            let Some(_permit) = permit else {
                debug!(job = %key, "run cancelled before it started");
                this.complete(&key, None);
                return;
            };

            let result = AssertUnwindSafe(this.runner.run(&key, trigger))
                .catch_unwind()
                .await;
            match result {
                Ok(report) => {
                    let finished = LastRun {
                        job: key.clone(),
                        finished_at: report.finished_at.unwrap_or_else(Utc::now),
                        status: report.status(),
                        run_id: report.run_id,
                    };
                    this.complete(&key, Some(finished));
                }
                Err(_) => {
                    error!(job = %key, "job run panicked");
                    this.complete(&key, None);
                }
            }
        });
    }

    fn complete(&self, key: &JobKey, finished: Option<LastRun>) {
        let mut jobs = self.jobs();
        let Some(state) = jobs.get_mut(key) else {
            return;
        };
        state.running = false;
        if let Some(last) = finished {
            state.last_run = Some(last.finished_at);
            state.last_status = Some(last.status);
            state.last_run_id = Some(last.run_id);
        }
        if state.retired {
            jobs.remove(key);
        }
    }

    pub fn job_views(&self) -> Vec<JobView> {
        let limits = self.limits();
        let jobs = self.jobs();
        jobs.iter()
            .filter(|(_, s)| !s.retired)
            .map(|(key, s)| {
                let source_enabled = limits.source_enabled(&key.platform);
                JobView {
                    key: key.to_string(),
                    platform: key.platform.clone(),
                    media_type: key.media_type,
                    country: key.country.clone(),
                    enabled: s.definition.enabled,
                    source_enabled,
                    schedule: s.definition.schedule,
                    next_fire: (s.definition.enabled && source_enabled).then_some(s.next_fire),
                    last_run: s.last_run,
                    last_status: s.last_status,
                    last_run_id: s.last_run_id.clone(),
                    running: s.running,
                }
            })
            .collect()
    }

    pub fn is_running(&self, key: &JobKey) -> bool {
        self.jobs().get(key).is_some_and(|s| s.running)
    }

    pub fn running_jobs(&self) -> Vec<JobKey> {
        self.jobs()
            .iter()
            .filter(|(_, s)| s.running)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn job_count(&self) -> usize {
        self.jobs().values().filter(|s| !s.retired).count()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Tick until cancelled, resyncing whenever the configuration changes.
    pub async fn run_loop(self: Arc<Self>, config: Arc<ConfigStore>) {
        let mut changes = config.subscribe();
        let mut watching = true;
        let mut tick_secs = config.snapshot().await.scheduler.tick_secs.max(1);
        let mut interval = new_interval(tick_secs);
        info!(tick_secs, jobs = self.job_count(), "scheduler started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    let due = self.tick(Utc::now());
                    if !due.is_empty() {
                        debug!(count = due.len(), "dispatched due jobs");
                    }
                }
                changed = changes.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let cfg = config.snapshot().await;
                    self.sync(&cfg, Utc::now());
                    let wanted = cfg.scheduler.tick_secs.max(1);
                    if wanted != tick_secs {
                        tick_secs = wanted;
                        interval = new_interval(tick_secs);
                    }
                    info!(jobs = self.job_count(), "scheduler resynced with settings");
                }
            }
        }
        info!("scheduler stopped");
    }

    /// Stop dispatching and give in-flight runs `grace` to finish.
    ///
    /// Returns whether every run finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.cancel.cancel();
        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight > 0 {
            info!(in_flight, grace_secs = grace.as_secs(), "waiting for running jobs");
        }
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    still_running = self.tracker.len(),
                    "grace period elapsed, abandoning running jobs"
                );
                false
            }
        }
    }
}

fn new_interval(secs: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
