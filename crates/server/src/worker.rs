//! One job run end to end: fetch the top list, resolve each title, submit it.
//!
//! Nothing escapes a run as an error. Per-title problems become title
//! outcomes; problems that make the rest of the run pointless become the
//! report's job-level failure.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use mediatrend_core::config::{BrowserSettings, Configuration};
use mediatrend_core::error::FailureKind;
use mediatrend_core::report::{JobReport, SubmissionOutcome, Trigger};
use mediatrend_core::types::{CanonicalId, JobKey, MediaType, RankedTitle, Resolution};
use mediatrend_db::repo::runs;
use mediatrend_metadata::matcher::TitleMatcher;
use mediatrend_metadata::provider::MetadataProvider;
use mediatrend_metadata::tmdb::TmdbClient;
use mediatrend_sources::{SourceAdapter, SourceError, SourceRegistry};
use mediatrend_targets::radarr::Radarr;
use mediatrend_targets::sonarr::Sonarr;
use mediatrend_targets::{Submitted, TargetAdapter, TargetError};
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::config_store::ConfigStore;
use crate::scheduler::JobRunner;
use crate::state::{EventSender, ServerEvent};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before each extra attempt at an unavailable source.
    pub source_backoff: Vec<Duration>,
    /// Delay before the single retry of a title after a connectivity error.
    pub target_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            source_backoff: vec![Duration::from_secs(2), Duration::from_secs(4)],
            target_retry_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Same attempt counts without the waiting.
    pub fn immediate() -> Self {
        Self {
            source_backoff: vec![Duration::ZERO; 2],
            target_retry_delay: Duration::ZERO,
        }
    }
}

/// Builds the adapters a run talks to from the configuration it runs with.
pub trait Connectors: Send + Sync {
    /// `Ok(None)` when no adapter exists for `platform`.
    fn source(
        &self,
        cfg: &Configuration,
        platform: &str,
    ) -> Result<Option<Arc<dyn SourceAdapter>>, SourceError>;

    fn metadata(&self, cfg: &Configuration) -> Arc<dyn MetadataProvider>;

    fn target(
        &self,
        cfg: &Configuration,
        media_type: MediaType,
    ) -> Result<Arc<dyn TargetAdapter>, TargetError>;
}

/// Real network adapters. The source registry, and with it the browser pool,
/// is rebuilt only when the browser settings change.
#[derive(Default)]
pub struct LiveConnectors {
    registry: Mutex<Option<(BrowserSettings, Arc<SourceRegistry>)>>,
}

impl Connectors for LiveConnectors {
    fn source(
        &self,
        cfg: &Configuration,
        platform: &str,
    ) -> Result<Option<Arc<dyn SourceAdapter>>, SourceError> {
        let mut cached = self
            .registry
            .lock()
            .map_err(|_| SourceError::Browser("source registry lock poisoned".into()))?;
        let registry = match cached.as_ref() {
            Some((settings, registry)) if *settings == cfg.browser => registry.clone(),
            _ => {
                let registry = Arc::new(SourceRegistry::from_settings(&cfg.browser)?);
                info!(
                    webdriver_url = %cfg.browser.webdriver_url,
                    max_sessions = cfg.browser.max_sessions,
                    "source registry built"
                );
                *cached = Some((cfg.browser.clone(), registry.clone()));
                registry
            }
        };
        Ok(registry.get(platform))
    }

    fn metadata(&self, cfg: &Configuration) -> Arc<dyn MetadataProvider> {
        Arc::new(TmdbClient::new(cfg.general.tmdb_api_key.trim().to_string()))
    }

    fn target(
        &self,
        cfg: &Configuration,
        media_type: MediaType,
    ) -> Result<Arc<dyn TargetAdapter>, TargetError> {
        let settings = cfg.target(media_type);
        Ok(match media_type {
            MediaType::Movie => Arc::new(Radarr::new(settings)?),
            MediaType::Series => Arc::new(Sonarr::new(settings)?),
        })
    }
}

/// A failure that ends the run after the current title.
struct Abort {
    kind: FailureKind,
    message: String,
}

impl Abort {
    fn new(kind: FailureKind, err: &dyn std::fmt::Display) -> Self {
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// The fetch, match, submit sequence over already-built adapters.
pub struct Pipeline<'a> {
    pub source: &'a dyn SourceAdapter,
    pub matcher: &'a TitleMatcher,
    pub target: &'a dyn TargetAdapter,
    pub retry: &'a RetryPolicy,
}

impl Pipeline<'_> {
    pub async fn run(&self, report: &mut JobReport, top_count: u32) {
        let job = report.job.clone();
        let titles = match self.fetch(&job, top_count).await {
            Ok(titles) => titles,
            Err(e) => {
                error!(
                    platform = %job.platform,
                    country = %job.country,
                    media_type = %job.media_type,
                    error = %e,
                    "fetching top list failed"
                );
                report.fail(e.failure_kind(), e.to_string());
                return;
            }
        };

        if titles.is_empty() {
            info!(job = %job, "source returned an empty list");
            return;
        }
        debug!(job = %job, count = titles.len(), "top list fetched");

        let mut seen = HashSet::new();
        for ranked in &titles {
            if !seen.insert(ranked.title.to_lowercase()) {
                debug!(job = %job, title = %ranked.title, "skipping duplicate title");
                continue;
            }
            if let Err(abort) = self.process(report, ranked).await {
                error!(job = %job, title = %ranked.title, kind = %abort.kind, error = %abort.message, "aborting run");
                report.fail(abort.kind, abort.message);
                break;
            }
        }
    }

    async fn fetch(&self, job: &JobKey, top_count: u32) -> Result<Vec<RankedTitle>, SourceError> {
        let mut attempt = 0;
        loop {
            match self
                .source
                .fetch(&job.country, job.media_type, top_count)
                .await
            {
                Ok(titles) => return Ok(titles),
                Err(e) if e.is_retryable() => {
                    let Some(delay) = self.retry.source_backoff.get(attempt).copied() else {
                        return Err(e);
                    };
                    attempt += 1;
                    warn!(
                        platform = %job.platform,
                        country = %job.country,
                        attempt,
                        error = %e,
                        "source unavailable, retrying in {}s",
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolve and submit one title. `Err` means the whole run must stop.
    async fn process(&self, report: &mut JobReport, ranked: &RankedTitle) -> Result<(), Abort> {
        let resolution = match self.matcher.resolve(&ranked.title, ranked.media_type).await {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(title = %ranked.title, media_type = %ranked.media_type, error = %e, "metadata lookup failed");
                report.record_submission(
                    ranked.rank,
                    &ranked.title,
                    None,
                    SubmissionOutcome::Failed {
                        kind: e.failure_kind(),
                        reason: e.to_string(),
                    },
                );
                return if e.is_job_level() {
                    Err(Abort::new(e.failure_kind(), &e))
                } else {
                    Ok(())
                };
            }
        };

        let id = match resolution {
            Resolution::Resolved(id) => id,
            Resolution::Unresolved { reason } => {
                report.record_unresolved(ranked.rank, &ranked.title, reason);
                return Ok(());
            }
        };

        match self.submit(&id).await {
            Ok(submitted) => {
                info!(
                    target_service = self.target.name(),
                    title = %ranked.title,
                    tmdb_id = id.tmdb_id,
                    outcome = ?submitted,
                    "title submitted"
                );
                report.record_submission(ranked.rank, &ranked.title, Some(id), submitted.into());
                Ok(())
            }
            Err(e) => {
                warn!(
                    target_service = self.target.name(),
                    title = %ranked.title,
                    tmdb_id = id.tmdb_id,
                    error = %e,
                    "submission failed"
                );
                report.record_submission(
                    ranked.rank,
                    &ranked.title,
                    Some(id),
                    SubmissionOutcome::from(&e),
                );
                if e.is_job_level() {
                    Err(Abort::new(e.failure_kind(), &e))
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn submit(&self, id: &CanonicalId) -> Result<Submitted, TargetError> {
        match self.target.submit(id).await {
            Err(e) if e.is_retryable() => {
                debug!(tmdb_id = id.tmdb_id, error = %e, "retrying submission");
                tokio::time::sleep(self.retry.target_retry_delay).await;
                self.target.submit(id).await
            }
            other => other,
        }
    }
}

/// Runs jobs against the live configuration and records them.
pub struct Worker {
    db: SqlitePool,
    config: Arc<ConfigStore>,
    events: EventSender,
    connectors: Arc<dyn Connectors>,
    retry: RetryPolicy,
}

impl Worker {
    pub fn new(
        db: SqlitePool,
        config: Arc<ConfigStore>,
        events: EventSender,
        connectors: Arc<dyn Connectors>,
    ) -> Self {
        Self {
            db,
            config,
            events,
            connectors,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn execute(&self, job: &JobKey, trigger: Trigger) -> JobReport {
        let cfg = self.config.snapshot().await;
        let mut report = JobReport::new(job.clone(), trigger, Utc::now());

        if let Err(e) = runs::insert_run(&self.db, &report).await {
            warn!(job = %job, error = %e, "failed to record run start");
        }
        let _ = self.events.send(ServerEvent::JobStarted {
            job: job.to_string(),
            run_id: report.run_id.clone(),
            trigger,
        });
        info!(job = %job, run_id = %report.run_id, trigger = trigger.as_str(), "job started");

        self.run_job(&cfg, &mut report).await;
        let report = report.finish(Utc::now());

        if let Err(e) = runs::finish_run(&self.db, &report).await {
            error!(job = %job, run_id = %report.run_id, error = %e, "failed to record run result");
        }

        let status = report.status();
        match &report.failure {
            Some(failure) => warn!(
                job = %job,
                kind = %failure.kind,
                message = %failure.message,
                "job failed"
            ),
            None => info!(
                job = %job,
                status = %status,
                added = report.counts.added,
                already_present = report.counts.already_present,
                unresolved = report.counts.unresolved,
                failed = report.counts.failed,
                "job finished"
            ),
        }
        let _ = self.events.send(ServerEvent::JobFinished {
            job: job.to_string(),
            run_id: report.run_id.clone(),
            status,
            counts: report.counts,
            failure: report.failure.clone(),
        });
        report
    }

    async fn run_job(&self, cfg: &Configuration, report: &mut JobReport) {
        let job = report.job.clone();

        if cfg.general.tmdb_api_key.trim().is_empty() {
            report.fail(
                FailureKind::MetadataNotConfigured,
                "TMDb API key is not configured",
            );
            return;
        }

        let target = match self.connectors.target(cfg, job.media_type) {
            Ok(target) => target,
            Err(e) => {
                report.fail(e.failure_kind(), e.to_string());
                return;
            }
        };

        let source = match self.connectors.source(cfg, &job.platform) {
            Ok(Some(source)) => source,
            Ok(None) => {
                report.fail(
                    FailureKind::Internal,
                    format!("no source adapter for platform '{}'", job.platform),
                );
                return;
            }
            Err(e) => {
                report.fail(e.failure_kind(), e.to_string());
                return;
            }
        };

        let matcher = TitleMatcher::new(self.connectors.metadata(cfg), cfg.matcher.clone());
        let pipeline = Pipeline {
            source: source.as_ref(),
            matcher: &matcher,
            target: target.as_ref(),
            retry: &self.retry,
        };
        pipeline.run(report, cfg.general.top_count).await;
    }
}

#[async_trait::async_trait]
impl JobRunner for Worker {
    async fn run(&self, job: &JobKey, trigger: Trigger) -> JobReport {
        self.execute(job, trigger).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mediatrend_core::config::MatcherSettings;
    use mediatrend_core::platform::{Platform, find_platform};
    use mediatrend_core::report::{RunStatus, TitleStatus};
    use mediatrend_metadata::MetadataError;
    use mediatrend_metadata::provider::SearchCandidate;
    use mediatrend_sources::adapter::rank_titles;
    use mediatrend_targets::adapter::{QualityProfile, RootFolder};

    struct FakeSource {
        platform: &'static Platform,
        responses: Mutex<VecDeque<Result<Vec<&'static str>, SourceError>>>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(responses: Vec<Result<Vec<&'static str>, SourceError>>) -> Self {
            Self {
                platform: find_platform("netflix").unwrap(),
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn listing(titles: Vec<&'static str>) -> Self {
            Self::new(vec![Ok(titles)])
        }
    }

    #[async_trait::async_trait]
    impl SourceAdapter for FakeSource {
        fn platform(&self) -> &'static Platform {
            self.platform
        }

        async fn fetch(
            &self,
            country: &str,
            media_type: MediaType,
            top_count: u32,
        ) -> Result<Vec<RankedTitle>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()));
            next.map(|titles| {
                rank_titles(
                    titles.into_iter().map(String::from),
                    self.platform,
                    country,
                    media_type,
                    top_count,
                )
            })
        }
    }

    /// Knows every title it is given, with id = position + 1.
    #[derive(Default)]
    struct FakeProvider {
        known: HashMap<String, u64>,
        key_rejected: bool,
        searches: AtomicUsize,
    }

    impl FakeProvider {
        fn knowing(titles: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                known: titles
                    .iter()
                    .enumerate()
                    .map(|(i, t)| (t.to_string(), i as u64 + 1))
                    .collect(),
                ..Self::default()
            })
        }
    }

    #[async_trait::async_trait]
    impl MetadataProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn search(
            &self,
            title: &str,
            _media_type: MediaType,
            _year: Option<i32>,
        ) -> Result<Vec<SearchCandidate>, MetadataError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            if self.key_rejected {
                return Err(MetadataError::Unauthorized("invalid API key".into()));
            }
            Ok(self
                .known
                .get(title)
                .map(|&id| SearchCandidate {
                    provider_id: id,
                    title: title.to_string(),
                    original_title: None,
                    year: Some(2024),
                    popularity: 10.0,
                    vote_count: 100,
                })
                .into_iter()
                .collect())
        }

        async fn tvdb_id(&self, series_id: u64) -> Result<Option<u64>, MetadataError> {
            Ok(Some(series_id + 1000))
        }
    }

    #[derive(Default)]
    struct FakeTarget {
        library: Mutex<HashSet<u64>>,
        rejected: HashSet<u64>,
        /// Remaining connectivity failures per id.
        flaky: Mutex<HashMap<u64, u32>>,
        auth_broken: bool,
        calls: Mutex<Vec<u64>>,
    }

    #[async_trait::async_trait]
    impl TargetAdapter for FakeTarget {
        fn name(&self) -> &'static str {
            "radarr"
        }

        fn media_type(&self) -> MediaType {
            MediaType::Movie
        }

        async fn submit(&self, id: &CanonicalId) -> Result<Submitted, TargetError> {
            self.calls.lock().unwrap().push(id.tmdb_id);
            if self.auth_broken {
                return Err(TargetError::Auth("Unauthorized".into()));
            }
            if let Some(left) = self.flaky.lock().unwrap().get_mut(&id.tmdb_id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(TargetError::Connectivity("connection reset".into()));
                }
            }
            if self.rejected.contains(&id.tmdb_id) {
                return Err(TargetError::Validation("rejected".into()));
            }
            if self.library.lock().unwrap().insert(id.tmdb_id) {
                Ok(Submitted::Added)
            } else {
                Ok(Submitted::AlreadyPresent)
            }
        }

        async fn quality_profiles(&self) -> Result<Vec<QualityProfile>, TargetError> {
            Ok(Vec::new())
        }

        async fn root_folders(&self) -> Result<Vec<RootFolder>, TargetError> {
            Ok(Vec::new())
        }
    }

    fn new_report() -> JobReport {
        JobReport::new(
            JobKey::new("netflix", MediaType::Movie, "US"),
            Trigger::Manual,
            Utc::now(),
        )
    }

    async fn run(
        source: &FakeSource,
        provider: Arc<FakeProvider>,
        target: &FakeTarget,
        top_count: u32,
    ) -> JobReport {
        let matcher = TitleMatcher::new(provider, MatcherSettings::default());
        let retry = RetryPolicy::immediate();
        let pipeline = Pipeline {
            source,
            matcher: &matcher,
            target,
            retry: &retry,
        };
        let mut report = new_report();
        pipeline.run(&mut report, top_count).await;
        report.finish(Utc::now())
    }

    #[tokio::test]
    async fn mixed_outcomes_are_counted_per_title() {
        let source = FakeSource::listing(vec!["Movie A", "Movie B", "Movie C"]);
        let provider = FakeProvider::knowing(&["Movie A", "Movie B", "Movie C"]);
        let target = FakeTarget {
            rejected: HashSet::from([3]),
            ..FakeTarget::default()
        };
        target.library.lock().unwrap().insert(1);

        let report = run(&source, provider, &target, 3).await;

        assert_eq!(report.counts.added, 1);
        assert_eq!(report.counts.already_present, 1);
        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.counts.unresolved, 0);
        assert!(report.failure.is_none());
        assert_eq!(report.status(), RunStatus::PartiallyFailed);
        let statuses: Vec<_> = report.titles.iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![TitleStatus::AlreadyPresent, TitleStatus::Added, TitleStatus::Failed]
        );
        assert_eq!(
            report.titles[2].failure_kind,
            Some(FailureKind::TargetValidationFailed)
        );
    }

    #[tokio::test]
    async fn unresolved_titles_never_reach_the_target() {
        let source = FakeSource::listing(vec!["Known Movie", "Obscure Show Ep 2"]);
        let provider = FakeProvider::knowing(&["Known Movie"]);
        let target = FakeTarget::default();

        let report = run(&source, provider, &target, 10).await;

        assert_eq!(report.counts.unresolved, 1);
        assert_eq!(report.counts.added, 1);
        assert_eq!(*target.calls.lock().unwrap(), vec![1]);
        assert_eq!(report.titles[1].status, TitleStatus::Unresolved);
    }

    #[tokio::test]
    async fn empty_list_is_a_clean_run() {
        let source = FakeSource::listing(Vec::new());
        let target = FakeTarget::default();

        let report = run(&source, FakeProvider::knowing(&[]), &target, 10).await;

        assert!(report.titles.is_empty());
        assert!(report.failure.is_none());
        assert_eq!(report.status(), RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn unavailable_source_is_retried_then_succeeds() {
        let source = FakeSource::new(vec![
            Err(SourceError::Unavailable("timeout".into())),
            Err(SourceError::Unavailable("timeout".into())),
            Ok(vec!["Movie A"]),
        ]);
        let target = FakeTarget::default();

        let report = run(&source, FakeProvider::knowing(&["Movie A"]), &target, 10).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.counts.added, 1);
        assert!(report.failure.is_none());
    }

    #[tokio::test]
    async fn persistent_outage_fails_the_job() {
        let source = FakeSource::new(vec![
            Err(SourceError::Unavailable("down".into())),
            Err(SourceError::Unavailable("down".into())),
            Err(SourceError::Unavailable("down".into())),
            Ok(vec!["never fetched"]),
        ]);
        let target = FakeTarget::default();

        let report = run(&source, FakeProvider::knowing(&[]), &target, 10).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::SourceUnavailable);
        assert_eq!(report.status(), RunStatus::Failed);
    }

    #[tokio::test]
    async fn format_change_is_not_retried() {
        let source = FakeSource::new(vec![Err(SourceError::FormatChanged("no list".into()))]);
        let target = FakeTarget::default();

        let report = run(&source, FakeProvider::knowing(&[]), &target, 10).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            report.failure.as_ref().map(|f| f.kind),
            Some(FailureKind::SourceFormatChanged)
        );
    }

    #[tokio::test]
    async fn connectivity_errors_get_one_retry() {
        let source = FakeSource::listing(vec!["Movie A", "Movie B"]);
        let provider = FakeProvider::knowing(&["Movie A", "Movie B"]);
        let target = FakeTarget {
            flaky: Mutex::new(HashMap::from([(1, 1), (2, 2)])),
            ..FakeTarget::default()
        };

        let report = run(&source, provider, &target, 10).await;

        assert_eq!(report.counts.added, 1);
        assert_eq!(report.counts.failed, 1);
        assert_eq!(
            report.titles[1].failure_kind,
            Some(FailureKind::TargetConnectivityFailed)
        );
        assert_eq!(*target.calls.lock().unwrap(), vec![1, 1, 2, 2]);
    }

    #[tokio::test]
    async fn auth_failure_stops_the_run() {
        let source = FakeSource::listing(vec!["Movie A", "Movie B", "Movie C"]);
        let provider = FakeProvider::knowing(&["Movie A", "Movie B", "Movie C"]);
        let target = FakeTarget {
            auth_broken: true,
            ..FakeTarget::default()
        };

        let report = run(&source, provider, &target, 10).await;

        assert_eq!(target.calls.lock().unwrap().len(), 1);
        assert_eq!(
            report.failure.as_ref().map(|f| f.kind),
            Some(FailureKind::TargetAuthFailed)
        );
    }

    #[tokio::test]
    async fn rejected_metadata_key_stops_the_run() {
        let source = FakeSource::listing(vec!["Movie A", "Movie B", "Movie C"]);
        let provider = Arc::new(FakeProvider {
            key_rejected: true,
            ..FakeProvider::default()
        });
        let target = FakeTarget::default();

        let report = run(&source, provider.clone(), &target, 10).await;

        assert_eq!(provider.searches.load(Ordering::SeqCst), 1);
        assert!(target.calls.lock().unwrap().is_empty());
        assert_eq!(report.counts.failed, 1);
        assert_eq!(
            report.titles[0].failure_kind,
            Some(FailureKind::MetadataAuthFailed)
        );
        assert_eq!(
            report.failure.as_ref().map(|f| f.kind),
            Some(FailureKind::MetadataAuthFailed)
        );
        assert_eq!(report.status(), RunStatus::Failed);
    }

    #[tokio::test]
    async fn duplicate_titles_are_processed_once() {
        let source = FakeSource::listing(vec!["Movie A", "movie a", "Movie B"]);
        let provider = FakeProvider::knowing(&["Movie A", "Movie B"]);
        let target = FakeTarget::default();

        let report = run(&source, provider, &target, 10).await;

        assert_eq!(report.titles.len(), 2);
        assert_eq!(*target.calls.lock().unwrap(), vec![1, 2]);
    }
}
