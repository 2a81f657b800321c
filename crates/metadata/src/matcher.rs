//! Resolve scraped title strings to metadata ids.
//!
//! Exact matches on case/punctuation-folded titles win. Without one, the
//! candidate with the highest Levenshtein ratio is taken if it clears the
//! configured threshold and no other candidate scores within the ambiguity
//! margin. Below threshold or ambiguous titles are unresolved, never guessed.

use std::sync::{Arc, LazyLock};

use mediatrend_core::config::MatcherSettings;
use mediatrend_core::types::{CanonicalId, MediaType, Resolution};
use regex::Regex;
use tracing::{debug, info};

use crate::MetadataError;
use crate::provider::{MetadataProvider, SearchCandidate};

static PAREN_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*\((\d{4})\)\s*$").unwrap());
static TRAILING_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s+(\d{4})$").unwrap());

pub struct TitleMatcher {
    provider: Arc<dyn MetadataProvider>,
    settings: MatcherSettings,
}

/// A raw title split into what is searched for and an optional year hint.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TitleQuery {
    query: String,
    /// Title with a trailing bare year removed. The year may belong to the title
    /// ("Blade Runner 2049"), so both forms are compared.
    alternate: Option<String>,
    year: Option<i32>,
}

impl TitleMatcher {
    pub fn new(provider: Arc<dyn MetadataProvider>, settings: MatcherSettings) -> Self {
        Self { provider, settings }
    }

    /// Resolve `raw_title` to a canonical id.
    ///
    /// Errors only when the provider cannot be queried; "no good match" is an
    /// `Unresolved` value.
    pub async fn resolve(
        &self,
        raw_title: &str,
        media_type: MediaType,
    ) -> Result<Resolution, MetadataError> {
        let parsed = parse_title(raw_title);
        let candidates = self
            .provider
            .search(&parsed.query, media_type, None)
            .await?;

        if candidates.is_empty() {
            info!(title = raw_title, media_type = %media_type, "no metadata search results");
            return Ok(Resolution::unresolved("no search results"));
        }

        let picked = match pick_candidate(&parsed, &candidates, &self.settings) {
            Ok(c) => c,
            Err(reason) => {
                info!(title = raw_title, media_type = %media_type, reason = %reason, "title unresolved");
                return Ok(Resolution::unresolved(reason));
            }
        };
        debug!(
            title = raw_title,
            tmdb_id = picked.provider_id,
            matched = %picked.title,
            "title matched"
        );

        let tvdb_id = match media_type {
            MediaType::Movie => None,
            MediaType::Series => match self.provider.tvdb_id(picked.provider_id).await? {
                Some(id) => Some(id),
                None => {
                    info!(title = raw_title, tmdb_id = picked.provider_id, "series has no TVDb id");
                    return Ok(Resolution::unresolved(format!(
                        "series {} has no TVDb id",
                        picked.provider_id
                    )));
                }
            },
        };

        Ok(Resolution::Resolved(CanonicalId {
            tmdb_id: picked.provider_id,
            tvdb_id,
            title: picked.title.clone(),
            year: picked.year,
        }))
    }
}

fn parse_title(raw: &str) -> TitleQuery {
    let raw = raw.trim();
    if let Some(caps) = PAREN_YEAR_RE.captures(raw) {
        return TitleQuery {
            query: caps[1].trim().to_string(),
            alternate: None,
            year: caps[2].parse().ok(),
        };
    }
    if let Some(caps) = TRAILING_YEAR_RE.captures(raw) {
        return TitleQuery {
            query: raw.to_string(),
            alternate: Some(caps[1].trim().to_string()),
            year: caps[2].parse().ok(),
        };
    }
    TitleQuery {
        query: raw.to_string(),
        alternate: None,
        year: None,
    }
}

pub fn normalize_title(title: &str) -> String {
    title
        .replace('&', "and")
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Normalized Levenshtein ratio in `0.0..=1.0`.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(a, b)
}

fn candidate_names(c: &SearchCandidate) -> impl Iterator<Item = String> + '_ {
    std::iter::once(normalize_title(&c.title))
        .chain(c.original_title.as_deref().map(normalize_title))
}

fn pick_candidate<'a>(
    parsed: &TitleQuery,
    candidates: &'a [SearchCandidate],
    settings: &MatcherSettings,
) -> Result<&'a SearchCandidate, String> {
    let full = normalize_title(&parsed.query);
    if full.is_empty() {
        return Err("title is empty after normalization".into());
    }
    let stripped = parsed
        .alternate
        .as_deref()
        .map(normalize_title)
        .filter(|s| !s.is_empty());
    // The year-less form only names a candidate released in that year.
    let year_fits = |c: &SearchCandidate| parsed.year.is_some() && c.year == parsed.year;

    let mut exact: Vec<&SearchCandidate> = candidates
        .iter()
        .filter(|c| candidate_names(c).any(|n| n == full))
        .collect();
    if exact.is_empty() {
        if let Some(stripped) = &stripped {
            exact = candidates
                .iter()
                .filter(|c| year_fits(c) && candidate_names(c).any(|n| &n == stripped))
                .collect();
        }
    }

    if !exact.is_empty() {
        let pool: Vec<&SearchCandidate> = match parsed.year {
            Some(year) if exact.iter().any(|c| c.year == Some(year)) => {
                exact.into_iter().filter(|c| c.year == Some(year)).collect()
            }
            _ => exact,
        };
        return most_popular(&pool).ok_or_else(|| "no exact candidate".into());
    }

    let mut scored: Vec<(f64, &SearchCandidate)> = candidates
        .iter()
        .map(|c| {
            let alternate = stripped.as_deref().filter(|_| year_fits(c));
            let score = candidate_names(c)
                .flat_map(|n| {
                    std::iter::once(full.as_str())
                        .chain(alternate)
                        .map(move |w| similarity(w, &n))
                })
                .fold(0.0, f64::max);
            (score, c)
        })
        .collect();
    // Stable sort keeps provider order among equal scores.
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    let Some(&(best_score, best)) = scored.first() else {
        return Err("no candidates".into());
    };
    if best_score < settings.similarity_threshold {
        return Err(format!(
            "no candidate above similarity threshold (best {best_score:.2} for '{}')",
            best.title
        ));
    }
    if let Some((runner_up, other)) = scored
        .iter()
        .skip(1)
        .find(|(_, c)| c.provider_id != best.provider_id)
    {
        if best_score - runner_up < settings.ambiguity_margin {
            return Err(format!(
                "ambiguous: '{}' ({best_score:.2}) vs '{}' ({runner_up:.2})",
                best.title, other.title
            ));
        }
    }
    Ok(best)
}

/// Highest vote count, then popularity, then earliest in provider order.
fn most_popular<'a>(pool: &[&'a SearchCandidate]) -> Option<&'a SearchCandidate> {
    let mut best: Option<&'a SearchCandidate> = None;
    for c in pool {
        let better = match best {
            None => true,
            Some(b) => {
                c.vote_count > b.vote_count
                    || (c.vote_count == b.vote_count && c.popularity > b.popularity)
            }
        };
        if better {
            best = Some(*c);
        }
    }
    best
}
