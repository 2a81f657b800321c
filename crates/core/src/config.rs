//! Process-wide configuration model, persisted as JSON.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::platform::{self, PLATFORMS, TOP_COUNTS};
use crate::schedule::{MIN_INTERVAL_MINUTES, Schedule, TimeOfDay};
use crate::types::{JobKey, MediaType};

static COUNTRY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:[A-Z]{2}|WORLD)$").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub general: GeneralSettings,
    pub auth: AuthSettings,
    pub scheduler: SchedulerSettings,
    pub matcher: MatcherSettings,
    pub browser: BrowserSettings,
    pub radarr: TargetSettings,
    pub sonarr: TargetSettings,
    pub web: WebSettings,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            general: GeneralSettings::default(),
            auth: AuthSettings::default(),
            scheduler: SchedulerSettings::default(),
            matcher: MatcherSettings::default(),
            browser: BrowserSettings::default(),
            radarr: TargetSettings {
                url: "http://localhost:7878".into(),
                root_folder_path: "/movies".into(),
                ..TargetSettings::default()
            },
            sonarr: TargetSettings {
                url: "http://localhost:8989".into(),
                root_folder_path: "/tv".into(),
                ..TargetSettings::default()
            },
            web: WebSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    pub tmdb_api_key: String,
    pub countries: Vec<String>,
    /// How many entries of each list are processed (3, 5 or 10).
    pub top_count: u32,
    /// Platform ids allowed to run. Jobs of other platforms never fire.
    pub enabled_sources: Vec<String>,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            tmdb_api_key: String::new(),
            countries: default_countries(),
            top_count: 10,
            enabled_sources: PLATFORMS.iter().map(|p| p.id.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub enabled: bool,
    pub username: String,
    /// Argon2 PHC string. A plaintext value is accepted and re-hashed on the next save.
    pub password: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            username: "admin".into(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub tick_secs: u64,
    pub max_concurrent_jobs: usize,
    pub shutdown_grace_secs: u64,
    /// Finished runs older than this are pruned. 0 keeps everything.
    pub history_retention_days: u32,
    pub jobs: Vec<JobDefinition>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            max_concurrent_jobs: 2,
            shutdown_grace_secs: 30,
            history_retention_days: 90,
            jobs: default_jobs(&default_countries()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub platform: String,
    pub media_type: MediaType,
    pub country: String,
    #[serde(default)]
    pub enabled: bool,
    pub schedule: Schedule,
}

impl JobDefinition {
    pub fn key(&self) -> JobKey {
        JobKey::new(&self.platform, self.media_type, &self.country)
    }
}

fn default_countries() -> Vec<String> {
    vec!["DE".into(), "US".into(), "CH".into()]
}

/// Disabled daily jobs for every platform, media type and country.
///
/// Each platform and media type gets its own slot, staggered by 15 minutes
/// from 04:00; the countries of one slot share it.
pub fn default_jobs(countries: &[String]) -> Vec<JobDefinition> {
    let mut jobs = Vec::with_capacity(PLATFORMS.len() * 2 * countries.len());
    for (i, p) in PLATFORMS.iter().enumerate() {
        for (j, media_type) in [MediaType::Movie, MediaType::Series].into_iter().enumerate() {
            let minutes = 4 * 60 + (i * 2 + j) as u32 * 15;
            let Some(at) = TimeOfDay::new((minutes / 60) % 24, minutes % 60) else {
                continue;
            };
            for country in countries {
                jobs.push(JobDefinition {
                    platform: p.id.to_string(),
                    media_type,
                    country: country.clone(),
                    enabled: false,
                    schedule: Schedule::Daily(at),
                });
            }
        }
    }
    jobs
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherSettings {
    /// Minimum normalized similarity (0..=1) for a fuzzy match.
    pub similarity_threshold: f64,
    /// Two fuzzy candidates closer than this are treated as ambiguous.
    pub ambiguity_margin: f64,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            ambiguity_margin: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub max_sessions: usize,
    pub acquire_timeout_secs: u64,
    pub page_load_timeout_secs: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".into(),
            max_sessions: 2,
            acquire_timeout_secs: 120,
            page_load_timeout_secs: 30,
        }
    }
}

/// Connection and add options for one library manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    pub url: String,
    pub api_key: String,
    pub quality_profile_id: i64,
    pub root_folder_path: String,
    pub search_on_add: bool,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            quality_profile_id: 1,
            root_folder_path: String::new(),
            search_on_add: true,
        }
    }
}

impl TargetSettings {
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    pub host: String,
    pub port: u16,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 9000,
        }
    }
}

impl Configuration {
    pub fn target(&self, media_type: MediaType) -> &TargetSettings {
        match media_type {
            MediaType::Movie => &self.radarr,
            MediaType::Series => &self.sonarr,
        }
    }

    pub fn source_enabled(&self, platform: &str) -> bool {
        self.general
            .enabled_sources
            .iter()
            .any(|s| s.eq_ignore_ascii_case(platform))
    }

    pub fn find_job(&self, key: &JobKey) -> Option<&JobDefinition> {
        self.scheduler.jobs.iter().find(|j| &j.key() == key)
    }

    /// Make the job list follow `general.countries`, upper-casing the codes.
    ///
    /// Jobs for countries no longer listed are dropped. Every platform and
    /// media type that has a job gets one for each listed country, copying
    /// the schedule and enabled flag of its first existing job. Returns
    /// whether the list changed.
    pub fn sync_country_jobs(&mut self) -> bool {
        for c in &mut self.general.countries {
            *c = c.trim().to_ascii_uppercase();
        }
        let mut countries: Vec<String> = Vec::new();
        for c in &self.general.countries {
            if COUNTRY_RE.is_match(c) && !countries.contains(c) {
                countries.push(c.clone());
            }
        }

        let before = self.scheduler.jobs.clone();
        let templates = if before.is_empty() {
            default_jobs(&countries)
        } else {
            before.clone()
        };
        let mut jobs: Vec<JobDefinition> = before
            .iter()
            .filter(|j| countries.contains(&j.country.to_ascii_uppercase()))
            .cloned()
            .collect();

        let mut seen = HashSet::new();
        for template in &templates {
            if !seen.insert((template.platform.to_ascii_lowercase(), template.media_type)) {
                continue;
            }
            for country in &countries {
                let exists = jobs.iter().any(|j| {
                    j.platform.eq_ignore_ascii_case(&template.platform)
                        && j.media_type == template.media_type
                        && j.country.eq_ignore_ascii_case(country)
                });
                if !exists {
                    jobs.push(JobDefinition {
                        country: country.clone(),
                        ..template.clone()
                    });
                }
            }
        }

        let changed = jobs != before;
        self.scheduler.jobs = jobs;
        changed
    }

    /// Validate all sections. Returns field-level errors or `None`.
    pub fn validate(&self) -> Option<Value> {
        let mut fields = serde_json::Map::new();
        let mut err = |field: String, msg: String| {
            if let Some(list) = fields.entry(field).or_insert_with(|| json!([])).as_array_mut() {
                list.push(json!(msg));
            }
        };

        if !TOP_COUNTS.contains(&self.general.top_count) {
            err("general.top_count".into(), "must be 3, 5 or 10".into());
        }
        if self.general.countries.is_empty() {
            err("general.countries".into(), "at least one country is required".into());
        }
        for c in &self.general.countries {
            if !COUNTRY_RE.is_match(c) {
                err(
                    "general.countries".into(),
                    format!("'{c}' is not an ISO 3166-1 alpha-2 code or WORLD"),
                );
            }
        }
        for s in &self.general.enabled_sources {
            if platform::find_platform(s).is_none() {
                err("general.enabled_sources".into(), format!("unknown platform '{s}'"));
            }
        }

        if self.auth.enabled {
            if self.auth.username.trim().is_empty() {
                err("auth.username".into(), "required when auth is enabled".into());
            }
            if self.auth.password.is_empty() {
                err("auth.password".into(), "required when auth is enabled".into());
            }
        }

        if !(30..=300).contains(&self.scheduler.tick_secs) {
            err("scheduler.tick_secs".into(), "must be between 30 and 300".into());
        }
        if !(1..=16).contains(&self.scheduler.max_concurrent_jobs) {
            err("scheduler.max_concurrent_jobs".into(), "must be between 1 and 16".into());
        }
        if self.scheduler.shutdown_grace_secs > 600 {
            err("scheduler.shutdown_grace_secs".into(), "must be at most 600".into());
        }
        if self.scheduler.history_retention_days > 3650 {
            err(
                "scheduler.history_retention_days".into(),
                "must be at most 3650".into(),
            );
        }

        let mut seen = HashSet::new();
        for (i, job) in self.scheduler.jobs.iter().enumerate() {
            let field = format!("scheduler.jobs[{i}]");
            if platform::find_platform(&job.platform).is_none() {
                err(field.clone(), format!("unknown platform '{}'", job.platform));
            }
            if !COUNTRY_RE.is_match(&job.country.to_ascii_uppercase()) {
                err(field.clone(), format!("invalid country '{}'", job.country));
            }
            if let Schedule::EveryMinutes(m) = job.schedule {
                if m < MIN_INTERVAL_MINUTES {
                    err(
                        field.clone(),
                        format!("interval must be at least {MIN_INTERVAL_MINUTES} minutes"),
                    );
                }
            }
            if !seen.insert(job.key()) {
                err(field, format!("duplicate job '{}'", job.key()));
            }
        }

        let m = &self.matcher;
        if !(m.similarity_threshold > 0.0 && m.similarity_threshold <= 1.0) {
            err("matcher.similarity_threshold".into(), "must be in (0, 1]".into());
        }
        if !(0.0..=0.5).contains(&m.ambiguity_margin) {
            err("matcher.ambiguity_margin".into(), "must be in [0, 0.5]".into());
        }

        if !is_http_url(&self.browser.webdriver_url) {
            err("browser.webdriver_url".into(), "must be an http(s) URL".into());
        }
        if !(1..=16).contains(&self.browser.max_sessions) {
            err("browser.max_sessions".into(), "must be between 1 and 16".into());
        }

        for (name, target) in [("radarr", &self.radarr), ("sonarr", &self.sonarr)] {
            if !target.url.is_empty() && !is_http_url(&target.url) {
                err(format!("{name}.url"), "must be an http(s) URL".into());
            }
            if target.quality_profile_id < 1 {
                err(format!("{name}.quality_profile_id"), "must be positive".into());
            }
        }

        if self.web.port == 0 {
            err("web.port".into(), "must be non-zero".into());
        }

        if fields.is_empty() {
            None
        } else {
            Some(Value::Object(fields))
        }
    }
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Configuration::default();
        assert_eq!(cfg.validate(), None);
        assert_eq!(
            cfg.scheduler.jobs.len(),
            PLATFORMS.len() * 2 * cfg.general.countries.len()
        );
        assert!(cfg.scheduler.jobs.iter().all(|j| !j.enabled));
        assert_eq!(cfg.web.port, 9000);
    }

    #[test]
    fn default_jobs_are_staggered() {
        let jobs = default_jobs(&["US".to_string()]);
        assert_eq!(jobs[0].schedule, Schedule::Daily(TimeOfDay::new(4, 0).unwrap()));
        assert_eq!(jobs[1].schedule, Schedule::Daily(TimeOfDay::new(4, 15).unwrap()));
        assert_eq!(jobs[2].platform, "amazon");
        assert_eq!(jobs[2].schedule, Schedule::Daily(TimeOfDay::new(4, 30).unwrap()));
    }

    #[test]
    fn default_jobs_cover_every_country() {
        let countries = vec!["DE".to_string(), "US".to_string()];
        let jobs = default_jobs(&countries);
        assert_eq!(jobs.len(), PLATFORMS.len() * 2 * 2);
        assert_eq!(jobs[0].key().to_string(), "netflix.movie.DE");
        assert_eq!(jobs[1].key().to_string(), "netflix.movie.US");
        assert_eq!(jobs[0].schedule, jobs[1].schedule);
    }

    #[test]
    fn jobs_follow_the_country_list() {
        let mut cfg = Configuration::default();
        let netflix_de = JobKey::new("netflix", MediaType::Movie, "DE");
        let idx = cfg.scheduler.jobs.iter().position(|j| j.key() == netflix_de).unwrap();
        cfg.scheduler.jobs[idx].enabled = true;
        cfg.scheduler.jobs[idx].schedule = Schedule::EveryMinutes(90);

        cfg.general.countries = vec!["de".into(), "FR".into(), "WORLD".into()];
        assert!(cfg.sync_country_jobs());

        assert!(cfg.find_job(&JobKey::new("netflix", MediaType::Movie, "US")).is_none());
        assert!(cfg.find_job(&JobKey::new("hbo", MediaType::Series, "CH")).is_none());
        let fr = cfg.find_job(&JobKey::new("netflix", MediaType::Movie, "FR")).unwrap();
        assert!(fr.enabled);
        assert_eq!(fr.schedule, Schedule::EveryMinutes(90));
        assert!(cfg.find_job(&JobKey::new("hbo", MediaType::Series, "WORLD")).is_some());
        assert_eq!(cfg.scheduler.jobs.len(), PLATFORMS.len() * 2 * 3);
        assert_eq!(cfg.validate(), None);

        // Already in line: nothing to do.
        assert!(!cfg.sync_country_jobs());
    }

    #[test]
    fn invalid_countries_add_no_jobs() {
        let mut cfg = Configuration::default();
        cfg.general.countries = vec!["US".into(), "germany".into()];
        cfg.sync_country_jobs();
        assert!(cfg.scheduler.jobs.iter().all(|j| j.country == "US"));
        assert_eq!(cfg.scheduler.jobs.len(), PLATFORMS.len() * 2);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let cfg: Configuration =
            serde_json::from_str(r#"{ "general": { "tmdb_api_key": "k", "top_count": 5 } }"#)
                .unwrap();
        assert_eq!(cfg.general.tmdb_api_key, "k");
        assert_eq!(cfg.general.top_count, 5);
        assert_eq!(cfg.general.countries, vec!["DE", "US", "CH"]);
        assert_eq!(cfg.radarr.url, "http://localhost:7878");
        assert_eq!(cfg.scheduler.history_retention_days, 90);
    }

    #[test]
    fn rejects_bad_values_per_field() {
        let mut cfg = Configuration::default();
        cfg.general.top_count = 7;
        cfg.general.countries.push("germany".into());
        cfg.auth.enabled = true;
        cfg.scheduler.jobs.push(cfg.scheduler.jobs[0].clone());
        cfg.radarr.url = "localhost:7878".into();
        cfg.scheduler.history_retention_days = 5000;

        let errors = cfg.validate().unwrap();
        assert!(errors.get("general.top_count").is_some());
        assert!(errors.get("general.countries").is_some());
        assert!(errors.get("auth.password").is_some());
        assert!(errors.get("radarr.url").is_some());
        assert!(errors.get("scheduler.history_retention_days").is_some());
        let dup = format!("scheduler.jobs[{}]", cfg.scheduler.jobs.len() - 1);
        assert!(errors.get(&dup).is_some());
    }

    #[test]
    fn interval_below_minimum_is_rejected() {
        let mut cfg = Configuration::default();
        cfg.scheduler.jobs[0].schedule = Schedule::EveryMinutes(2);
        let errors = cfg.validate().unwrap();
        assert!(errors.get("scheduler.jobs[0]").is_some());
    }

    #[test]
    fn source_filter_and_target_lookup() {
        let mut cfg = Configuration::default();
        cfg.general.enabled_sources = vec!["netflix".into()];
        assert!(cfg.source_enabled("Netflix"));
        assert!(!cfg.source_enabled("hbo"));
        assert_eq!(cfg.target(MediaType::Series).root_folder_path, "/tv");
        let key = JobKey::new("netflix", MediaType::Movie, "US");
        assert!(cfg.find_job(&key).is_some());
    }
}
