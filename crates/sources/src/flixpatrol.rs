//! Top lists of the non-Netflix platforms, rendered from FlixPatrol.

use std::sync::Arc;
use std::time::Duration;

use mediatrend_core::platform::Platform;
use mediatrend_core::types::{MediaType, RankedTitle};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::SourceError;
use crate::adapter::{SourceAdapter, rank_titles};
use crate::browser::BrowserPool;
use crate::countries::flixpatrol_slug;
use crate::webdriver::{Locator, WebDriverSession};

const BASE_URL: &str = "https://flixpatrol.com/top10";
const TAB_TIMEOUT: Duration = Duration::from_secs(5);
const CONTENT_TIMEOUT: Duration = Duration::from_secs(10);
const CONTENT_SELECTOR: &str = "div.card.-mx-content";
const FALLBACK_HEADER: &str = "TOP 10 Overall";

pub struct FlixPatrol {
    platform: &'static Platform,
    pool: Arc<BrowserPool>,
    base_url: String,
}

impl FlixPatrol {
    pub fn new(platform: &'static Platform, pool: Arc<BrowserPool>) -> Self {
        Self::with_base_url(platform, pool, BASE_URL)
    }

    pub fn with_base_url(
        platform: &'static Platform,
        pool: Arc<BrowserPool>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            pool,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn list_url(&self, country_slug: &str) -> String {
        format!("{}/{}/{country_slug}/", self.base_url, self.platform.slug)
    }

    /// Load the list page and return its rendered HTML, or `None` for a 404 page.
    async fn render(
        &self,
        session: &WebDriverSession,
        url: &str,
        media_type: MediaType,
    ) -> Result<Option<String>, SourceError> {
        session.navigate(url).await?;

        let title = session.title().await?.to_lowercase();
        if title.contains("page not found") || title.contains("404") {
            return Ok(None);
        }

        let tab = primary_header(media_type);
        let xpath = format!("//a[span[text()='{tab}']]");
        match session.wait_for(Locator::XPath(&xpath), TAB_TIMEOUT).await? {
            Some(el) => match session.click(&el).await {
                Ok(()) => debug!(platform = self.platform.id, tab, "clicked list tab"),
                Err(e) => warn!(
                    platform = self.platform.id,
                    tab,
                    error = %e,
                    "list tab click failed, using default view"
                ),
            },
            None => debug!(platform = self.platform.id, tab, "no list tab, using default view"),
        }

        if session
            .wait_for(Locator::Css(CONTENT_SELECTOR), CONTENT_TIMEOUT)
            .await?
            .is_none()
        {
            let source = session.source().await?;
            if source.to_lowercase().contains("page not found") {
                return Ok(None);
            }
            return Err(SourceError::FormatChanged(format!(
                "'{CONTENT_SELECTOR}' never appeared on {url}"
            )));
        }

        Ok(Some(session.source().await?))
    }
}

#[async_trait::async_trait]
impl SourceAdapter for FlixPatrol {
    fn platform(&self) -> &'static Platform {
        self.platform
    }

    async fn fetch(
        &self,
        country: &str,
        media_type: MediaType,
        top_count: u32,
    ) -> Result<Vec<RankedTitle>, SourceError> {
        let Some(country_slug) = flixpatrol_slug(country) else {
            warn!(platform = self.platform.id, country, "FlixPatrol has no list for this country");
            return Ok(Vec::new());
        };
        let url = self.list_url(country_slug);

        let lease = self.pool.acquire().await?;
        let rendered = match lease.session() {
            Some(session) => self.render(session, &url, media_type).await,
            None => Err(SourceError::Browser("lease has no session".into())),
        };
        lease.release().await;

        let Some(html) = rendered? else {
            info!(platform = self.platform.id, country, url = %url, "FlixPatrol page not found");
            return Ok(Vec::new());
        };

        let titles = parse_top_list(&html, media_type)?;
        if titles.is_empty() {
            warn!(platform = self.platform.id, country, "no matching top list card");
        }
        Ok(rank_titles(titles, self.platform, country, media_type, top_count))
    }
}

fn primary_header(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Movie => "Movies",
        MediaType::Series => "TV Shows",
    }
}

/// Titles from the card for `media_type`, else from the overall card.
pub fn parse_top_list(html: &str, media_type: MediaType) -> Result<Vec<String>, SourceError> {
    let document = Html::parse_document(html);
    let parse = |s: &str| Selector::parse(s).map_err(|e| SourceError::FormatChanged(e.to_string()));
    let card_selector = parse("div.card")?;
    let h3_selector = parse("h3")?;
    let row_selector = parse("table.card-table tr")?;
    let link_selector = parse("a")?;

    let primary = primary_header(media_type);
    let prefixed = format!("TOP 10 {primary}");

    let cards: Vec<(ElementRef, String)> = document
        .select(&card_selector)
        .filter_map(|card| {
            let header = card.select(&h3_selector).next()?;
            Some((card, header.text().collect::<String>().trim().to_string()))
        })
        .collect();

    let card = cards
        .iter()
        .find(|(_, h)| h == primary || h.contains(&prefixed))
        .or_else(|| cards.iter().find(|(_, h)| h.contains(FALLBACK_HEADER)))
        .map(|(card, _)| *card);

    let Some(card) = card else {
        return Ok(Vec::new());
    };

    Ok(card
        .select(&row_selector)
        .filter_map(|row| {
            row.select(&link_selector)
                .next()
                .map(|a| a.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty())
        })
        .collect())
}
