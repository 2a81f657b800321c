use mediatrend_core::config::TargetSettings;
use mediatrend_core::types::{CanonicalId, MediaType};
use serde_json::{Value, json};
use tracing::info;

use crate::TargetError;
use crate::adapter::{QualityProfile, RootFolder, Submitted, TargetAdapter};
use crate::arr::{ArrClient, Created};

pub struct Sonarr {
    client: ArrClient,
    quality_profile_id: i64,
    root_folder_path: String,
    search_on_add: bool,
}

impl Sonarr {
    pub fn new(settings: &TargetSettings) -> Result<Self, TargetError> {
        Ok(Self {
            client: ArrClient::new("sonarr", settings)?,
            quality_profile_id: settings.quality_profile_id,
            root_folder_path: settings.root_folder_path.clone(),
            search_on_add: settings.search_on_add,
        })
    }

    async fn is_present(&self, tvdb_id: u64) -> Result<bool, TargetError> {
        let id = tvdb_id.to_string();
        let existing = self.client.get_json("series", &[("tvdbId", id.as_str())]).await?;
        Ok(existing.as_array().is_some_and(|series| {
            series
                .iter()
                .any(|s| s["tvdbId"].as_u64() == Some(tvdb_id))
        }))
    }

    /// Sonarr wants the full lookup record of a series when adding it.
    async fn lookup(&self, tvdb_id: u64) -> Result<Value, TargetError> {
        let term = format!("tvdb:{tvdb_id}");
        let results = self
            .client
            .get_json("series/lookup", &[("term", term.as_str())])
            .await?;
        results
            .as_array()
            .and_then(|r| r.first())
            .filter(|r| r.is_object())
            .cloned()
            .ok_or_else(|| TargetError::Validation(format!("sonarr lookup found nothing for {term}")))
    }
}

#[async_trait::async_trait]
impl TargetAdapter for Sonarr {
    fn name(&self) -> &'static str {
        "sonarr"
    }

    fn media_type(&self) -> MediaType {
        MediaType::Series
    }

    async fn submit(&self, id: &CanonicalId) -> Result<Submitted, TargetError> {
        let tvdb_id = id
            .tvdb_id
            .ok_or_else(|| TargetError::Validation(format!("'{}' has no TVDb id", id.title)))?;

        if self.is_present(tvdb_id).await? {
            return Ok(Submitted::AlreadyPresent);
        }

        let mut payload = self.lookup(tvdb_id).await?;
        payload["qualityProfileId"] = json!(self.quality_profile_id);
        payload["rootFolderPath"] = json!(self.root_folder_path);
        payload["monitored"] = json!(true);
        payload["seasonFolder"] = json!(true);
        payload["addOptions"] = json!({
            "searchForMissingEpisodes": self.search_on_add,
            "monitor": "all",
        });

        match self.client.post_json("series", &payload).await? {
            Created::New(_) => {
                info!(title = %id.title, tvdb_id, "series added to sonarr");
                Ok(Submitted::Added)
            }
            Created::AlreadyExists => Ok(Submitted::AlreadyPresent),
        }
    }

    async fn quality_profiles(&self) -> Result<Vec<QualityProfile>, TargetError> {
        self.client.quality_profiles().await
    }

    async fn root_folders(&self) -> Result<Vec<RootFolder>, TargetError> {
        self.client.root_folders().await
    }
}
