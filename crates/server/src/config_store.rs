//! The single live [`Configuration`], persisted as JSON.
//!
//! Readers take snapshots under a read lock. Writers hold the write lock for
//! the whole validate, persist, swap sequence, so an update is either fully
//! applied or not at all, and the scheduler never sees a half-written config.

use std::path::{Path, PathBuf};

use mediatrend_core::config::{AuthSettings, Configuration};
use mediatrend_core::error::ApiError;
use thiserror::Error;
use tokio::sync::{RwLock, watch};
use tracing::{info, warn};

use crate::auth;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("settings are invalid")]
    Invalid(serde_json::Value),
    #[error("failed to persist settings: {0}")]
    Persistence(String),
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Invalid(fields) => ApiError::Validation(fields),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Values taken from `MEDIATREND_*` variables. They win over the file and are
/// never written back to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverrides {
    pub tmdb_api_key: Option<String>,
    pub radarr_url: Option<String>,
    pub radarr_api_key: Option<String>,
    pub sonarr_url: Option<String>,
    pub sonarr_api_key: Option<String>,
    pub auth_enabled: Option<bool>,
    pub webdriver_url: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            tmdb_api_key: get("MEDIATREND_TMDB_API_KEY"),
            radarr_url: get("MEDIATREND_RADARR_URL"),
            radarr_api_key: get("MEDIATREND_RADARR_API_KEY"),
            sonarr_url: get("MEDIATREND_SONARR_URL"),
            sonarr_api_key: get("MEDIATREND_SONARR_API_KEY"),
            auth_enabled: get("MEDIATREND_AUTH_ENABLED")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")),
            webdriver_url: get("MEDIATREND_WEBDRIVER_URL"),
        }
    }

    pub fn apply(&self, cfg: &mut Configuration) {
        set(&mut cfg.general.tmdb_api_key, &self.tmdb_api_key);
        set(&mut cfg.radarr.url, &self.radarr_url);
        set(&mut cfg.radarr.api_key, &self.radarr_api_key);
        set(&mut cfg.sonarr.url, &self.sonarr_url);
        set(&mut cfg.sonarr.api_key, &self.sonarr_api_key);
        set(&mut cfg.browser.webdriver_url, &self.webdriver_url);
        if let Some(enabled) = self.auth_enabled {
            cfg.auth.enabled = enabled;
        }
    }

    /// Put the file's own values back into every overridden field of `cfg`.
    fn restore(&self, cfg: &mut Configuration, file: &Configuration) {
        keep(&mut cfg.general.tmdb_api_key, &file.general.tmdb_api_key, &self.tmdb_api_key);
        keep(&mut cfg.radarr.url, &file.radarr.url, &self.radarr_url);
        keep(&mut cfg.radarr.api_key, &file.radarr.api_key, &self.radarr_api_key);
        keep(&mut cfg.sonarr.url, &file.sonarr.url, &self.sonarr_url);
        keep(&mut cfg.sonarr.api_key, &file.sonarr.api_key, &self.sonarr_api_key);
        keep(&mut cfg.browser.webdriver_url, &file.browser.webdriver_url, &self.webdriver_url);
        if self.auth_enabled.is_some() {
            cfg.auth.enabled = file.auth.enabled;
        }
    }
}

fn set(field: &mut String, value: &Option<String>) {
    if let Some(v) = value {
        *field = v.clone();
    }
}

fn keep(field: &mut String, file_value: &str, overridden: &Option<String>) {
    if overridden.is_some() {
        *field = file_value.to_string();
    }
}

struct Stored {
    /// What the settings file holds.
    file: Configuration,
    /// File plus environment overrides; what the rest of the process sees.
    effective: Configuration,
}

pub struct ConfigStore {
    path: PathBuf,
    overrides: EnvOverrides,
    stored: RwLock<Stored>,
    revision: watch::Sender<u64>,
}

impl ConfigStore {
    /// Load settings from `path`, writing defaults if the file does not exist.
    ///
    /// An unreadable or unparseable file is logged and replaced by defaults in
    /// memory only; the file itself is left for the operator to fix.
    pub async fn load(
        path: impl Into<PathBuf>,
        overrides: EnvOverrides,
    ) -> Result<Self, ConfigError> {
        let path = path.into();
        let mut file = match read_file(&path).await {
            Ok(cfg) => cfg,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let defaults = Configuration::default();
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                save_atomic(&path, &defaults).await?;
                info!(path = %path.display(), "wrote default settings");
                defaults
            }
            Err(ConfigError::Parse(e)) => {
                warn!(path = %path.display(), error = %e, "settings file is not valid JSON, using defaults");
                Configuration::default()
            }
            Err(e) => return Err(e),
        };

        if !file.auth.password.is_empty() && !auth::is_password_hash(&file.auth.password) {
            file.auth.password = hash_off_runtime(std::mem::take(&mut file.auth.password)).await?;
            info!("plaintext password will be stored hashed on next save");
        }
        if file.sync_country_jobs() {
            info!(countries = ?file.general.countries, "jobs aligned with country list");
        }

        let mut effective = file.clone();
        overrides.apply(&mut effective);
        if let Some(fields) = effective.validate() {
            warn!(errors = %fields, "loaded settings have validation errors");
        }

        let (revision, _) = watch::channel(0);
        Ok(Self {
            path,
            overrides,
            stored: RwLock::new(Stored { file, effective }),
            revision,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current effective configuration.
    pub async fn snapshot(&self) -> Configuration {
        self.stored.read().await.effective.clone()
    }

    /// Snapshot with the password hash blanked out, for display.
    pub async fn redacted(&self) -> Configuration {
        let mut cfg = self.snapshot().await;
        cfg.auth.password.clear();
        cfg
    }

    pub async fn auth(&self) -> AuthSettings {
        self.stored.read().await.effective.auth.clone()
    }

    /// Receiver bumped after every successful update.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Validate, persist and swap in a new configuration.
    ///
    /// An empty password keeps the stored hash; a plaintext one is hashed. On
    /// any error the live configuration is unchanged.
    pub async fn update(&self, mut incoming: Configuration) -> Result<Configuration, ConfigError> {
        if !incoming.auth.password.is_empty() && !auth::is_password_hash(&incoming.auth.password) {
            incoming.auth.password =
                hash_off_runtime(std::mem::take(&mut incoming.auth.password)).await?;
        }
        incoming.sync_country_jobs();

        let mut stored = self.stored.write().await;
        if incoming.auth.password.is_empty() {
            incoming.auth.password = stored.file.auth.password.clone();
        }

        let mut file = incoming;
        self.overrides.restore(&mut file, &stored.file);
        let mut effective = file.clone();
        self.overrides.apply(&mut effective);

        if let Some(fields) = effective.validate() {
            return Err(ConfigError::Invalid(fields));
        }

        save_atomic(&self.path, &file).await?;
        *stored = Stored {
            file,
            effective: effective.clone(),
        };
        drop(stored);

        self.revision.send_modify(|r| *r += 1);
        info!(path = %self.path.display(), "settings saved");
        Ok(effective)
    }
}

/// Run argon2 on the blocking pool.
async fn hash_off_runtime(password: String) -> Result<String, ConfigError> {
    tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(|e| ConfigError::Persistence(format!("password hashing task failed: {e}")))?
        .map_err(|e| ConfigError::Persistence(format!("password hashing failed: {e}")))
}

async fn read_file(path: &Path) -> Result<Configuration, ConfigError> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Write to a sibling temp file, then rename over the target.
async fn save_atomic(path: &Path, cfg: &Configuration) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(cfg)
        .map_err(|e| ConfigError::Persistence(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| ConfigError::Persistence(format!("{}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| ConfigError::Persistence(format!("{}: {e}", path.display())))?;
    Ok(())
}
