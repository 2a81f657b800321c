use mediatrend_core::types::MediaType;

use crate::MetadataError;

/// A metadata service that can look titles up by name.
#[async_trait::async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Search movies or series by title, narrowed to `year` when given.
    async fn search(
        &self,
        title: &str,
        media_type: MediaType,
        year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, MetadataError>;

    /// TVDb id of a series, if the provider knows one.
    async fn tvdb_id(&self, series_id: u64) -> Result<Option<u64>, MetadataError>;
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchCandidate {
    pub provider_id: u64,
    pub title: String,
    pub original_title: Option<String>,
    pub year: Option<i32>,
    pub popularity: f64,
    pub vote_count: u64,
}
