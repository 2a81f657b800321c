use mediatrend_core::config::TargetSettings;
use mediatrend_core::types::{CanonicalId, MediaType};
use serde_json::json;
use tracing::info;

use crate::TargetError;
use crate::adapter::{QualityProfile, RootFolder, Submitted, TargetAdapter};
use crate::arr::{ArrClient, Created};

pub struct Radarr {
    client: ArrClient,
    quality_profile_id: i64,
    root_folder_path: String,
    search_on_add: bool,
}

impl Radarr {
    pub fn new(settings: &TargetSettings) -> Result<Self, TargetError> {
        Ok(Self {
            client: ArrClient::new("radarr", settings)?,
            quality_profile_id: settings.quality_profile_id,
            root_folder_path: settings.root_folder_path.clone(),
            search_on_add: settings.search_on_add,
        })
    }

    async fn is_present(&self, tmdb_id: u64) -> Result<bool, TargetError> {
        let id = tmdb_id.to_string();
        let existing = self.client.get_json("movie", &[("tmdbId", id.as_str())]).await?;
        Ok(existing.as_array().is_some_and(|movies| {
            movies
                .iter()
                .any(|m| m["tmdbId"].as_u64() == Some(tmdb_id))
        }))
    }
}

#[async_trait::async_trait]
impl TargetAdapter for Radarr {
    fn name(&self) -> &'static str {
        "radarr"
    }

    fn media_type(&self) -> MediaType {
        MediaType::Movie
    }

    async fn submit(&self, id: &CanonicalId) -> Result<Submitted, TargetError> {
        if self.is_present(id.tmdb_id).await? {
            return Ok(Submitted::AlreadyPresent);
        }

        let mut payload = json!({
            "tmdbId": id.tmdb_id,
            "title": id.title,
            "qualityProfileId": self.quality_profile_id,
            "rootFolderPath": self.root_folder_path,
            "monitored": true,
            "addOptions": { "searchForMovie": self.search_on_add },
        });
        if let Some(year) = id.year.filter(|y| *y > 0) {
            payload["year"] = json!(year);
        }

        match self.client.post_json("movie", &payload).await? {
            Created::New(_) => {
                info!(title = %id.title, tmdb_id = id.tmdb_id, "movie added to radarr");
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
