use mediatrend_core::platform::Platform;
use mediatrend_core::types::{MediaType, RankedTitle};

use crate::SourceError;

/// Fetches one platform's ranked top list.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn platform(&self) -> &'static Platform;

    /// Ranked titles for `country`, at most `top_count` long.
    ///
    /// An empty list is a valid answer: the platform may publish nothing for
    /// that country.
    async fn fetch(
        &self,
        country: &str,
        media_type: MediaType,
        top_count: u32,
    ) -> Result<Vec<RankedTitle>, SourceError>;
}

/// Turn scraped titles into 1-based ranked entries, dropping blanks.
pub fn rank_titles(
    titles: impl IntoIterator<Item = String>,
    platform: &Platform,
    country: &str,
    media_type: MediaType,
    top_count: u32,
) -> Vec<RankedTitle> {
    titles
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .take(top_count as usize)
        .enumerate()
        .map(|(i, title)| RankedTitle {
            title,
            rank: i as u32 + 1,
            media_type,
            platform: platform.id.to_string(),
            country: country.to_string(),
        })
        .collect()
}
