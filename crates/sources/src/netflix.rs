//! Netflix top lists from the public Tudum pages.

use std::time::Duration;

use mediatrend_core::platform::{Platform, find_platform};
use mediatrend_core::types::{MediaType, RankedTitle};
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::SourceError;
use crate::adapter::{SourceAdapter, rank_titles};
use crate::countries::netflix_slug;

const BASE_URL: &str = "https://www.netflix.com/tudum/top10";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)";

pub struct NetflixTudum {
    platform: &'static Platform,
    client: reqwest::Client,
    base_url: String,
}

impl NetflixTudum {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, SourceError> {
        let platform = find_platform("netflix")
            .ok_or_else(|| SourceError::Unavailable("netflix missing from catalog".into()))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            platform,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn list_url(&self, country: &str, media_type: MediaType) -> String {
        let mut url = self.base_url.clone();
        if let Some(slug) = netflix_slug(country) {
            url.push('/');
            url.push_str(&slug);
        }
        if media_type == MediaType::Series {
            url.push_str("/tv");
        }
        url
    }
}

#[async_trait::async_trait]
impl SourceAdapter for NetflixTudum {
    fn platform(&self) -> &'static Platform {
        self.platform
    }

    async fn fetch(
        &self,
        country: &str,
        media_type: MediaType,
        top_count: u32,
    ) -> Result<Vec<RankedTitle>, SourceError> {
        let url = self.list_url(country, media_type);
        debug!(url = %url, "fetching Tudum list");

        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            warn!(url = %url, country, "Tudum has no list for this country");
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "Tudum returned {} for {url}",
                resp.status()
            )));
        }

        let html = resp.text().await?;
        let titles = parse_top_list(&html)?;
        Ok(rank_titles(titles, self.platform, country, media_type, top_count))
    }
}

/// Titles of the `<ul>` whose items carry the most `<img alt>` texts.
pub fn parse_top_list(html: &str) -> Result<Vec<String>, SourceError> {
    let document = Html::parse_document(html);
    let ul_selector =
        Selector::parse("ul").map_err(|e| SourceError::FormatChanged(e.to_string()))?;
    let li_selector =
        Selector::parse("li").map_err(|e| SourceError::FormatChanged(e.to_string()))?;
    let img_selector =
        Selector::parse("img[alt]").map_err(|e| SourceError::FormatChanged(e.to_string()))?;

    let mut seen_list = false;
    let mut best: Vec<String> = Vec::new();

    for ul in document.select(&ul_selector) {
        seen_list = true;
        let titles: Vec<String> = ul
            .select(&li_selector)
            .filter_map(|li| {
                li.select(&img_selector)
                    .next()
                    .and_then(|img| img.value().attr("alt"))
                    .map(|alt| alt.trim().to_string())
                    .filter(|alt| !alt.is_empty())
            })
            .collect();
        if titles.len() > best.len() {
            best = titles;
        }
    }

    if !seen_list {
        return Err(SourceError::FormatChanged(
            "Tudum page contains no list elements".into(),
        ));
    }
    Ok(best)
}
