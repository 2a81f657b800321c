//! Catalog of supported streaming platforms and countries.

use serde::Serialize;

/// How a platform's top list is retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Plain HTTP fetch, parsed directly.
    Http,
    /// Page rendered in a headless browser session.
    Rendered,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Platform {
    pub id: &'static str,
    pub name: &'static str,
    /// Path segment the platform is published under by its list provider.
    pub slug: &'static str,
    pub strategy: Strategy,
}

pub static PLATFORMS: &[Platform] = &[
    Platform { id: "netflix", name: "Netflix", slug: "netflix", strategy: Strategy::Http },
    Platform { id: "amazon", name: "Amazon Prime", slug: "amazon-prime", strategy: Strategy::Rendered },
    Platform { id: "disney", name: "Disney+", slug: "disney", strategy: Strategy::Rendered },
    Platform { id: "hbo", name: "HBO Max", slug: "hbo-max", strategy: Strategy::Rendered },
    Platform { id: "hulu", name: "Hulu", slug: "hulu", strategy: Strategy::Rendered },
    Platform { id: "peacock", name: "Peacock", slug: "peacock", strategy: Strategy::Rendered },
    Platform { id: "paramount", name: "Paramount+", slug: "paramount-plus", strategy: Strategy::Rendered },
    Platform { id: "apple", name: "Apple TV+", slug: "apple-tv", strategy: Strategy::Rendered },
    Platform { id: "discovery", name: "Discovery+", slug: "discovery-plus", strategy: Strategy::Rendered },
    Platform { id: "star", name: "Star+", slug: "star-plus", strategy: Strategy::Rendered },
    Platform { id: "rakuten", name: "Rakuten TV", slug: "rakuten-tv", strategy: Strategy::Rendered },
    Platform { id: "google", name: "Google Play", slug: "google-play", strategy: Strategy::Rendered },
    Platform { id: "crunchyroll", name: "Crunchyroll", slug: "crunchyroll", strategy: Strategy::Rendered },
    Platform { id: "bbc", name: "BBC iPlayer", slug: "bbc", strategy: Strategy::Rendered },
    Platform { id: "joyn", name: "Joyn", slug: "joyn", strategy: Strategy::Rendered },
    Platform { id: "rtl", name: "RTL+", slug: "rtl-plus", strategy: Strategy::Rendered },
    Platform { id: "sky", name: "Sky", slug: "sky", strategy: Strategy::Rendered },
    Platform { id: "canal", name: "Canal+", slug: "canal-plus", strategy: Strategy::Rendered },
];

pub fn find_platform(id: &str) -> Option<&'static Platform> {
    PLATFORMS.iter().find(|p| p.id.eq_ignore_ascii_case(id))
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Country {
    pub name: &'static str,
    pub code: &'static str,
}

/// Pseudo country code for worldwide lists.
pub const WORLD: &str = "WORLD";

pub static COMMON_COUNTRIES: &[Country] = &[
    Country { name: "Worldwide", code: WORLD },
    Country { name: "Switzerland", code: "CH" },
    Country { name: "Germany", code: "DE" },
    Country { name: "Austria", code: "AT" },
    Country { name: "United States", code: "US" },
    Country { name: "United Kingdom", code: "GB" },
    Country { name: "France", code: "FR" },
    Country { name: "Italy", code: "IT" },
    Country { name: "Spain", code: "ES" },
    Country { name: "Canada", code: "CA" },
    Country { name: "Australia", code: "AU" },
];

/// Allowed top-list lengths.
pub const TOP_COUNTS: &[u32] = &[3, 5, 10];
