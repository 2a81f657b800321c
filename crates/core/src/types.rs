use serde::{Deserialize, Serialize};

/// Kind of title a job scrapes and submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Movie,
    Series,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Series => "series",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "movie" | "movies" | "film" => Some(Self::Movie),
            "series" | "tv" | "show" | "shows" => Some(Self::Series),
            _ => None,
        }
    }

    /// Name of the library manager that acquires this kind of title.
    pub fn target_name(self) -> &'static str {
        match self {
            Self::Movie => "radarr",
            Self::Series => "sonarr",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a job: one platform, one media type, one country.
///
/// Rendered as `platform.media_type.COUNTRY`, e.g. `netflix.movie.US`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobKey {
    pub platform: String,
    pub media_type: MediaType,
    pub country: String,
}

impl JobKey {
    pub fn new(platform: impl Into<String>, media_type: MediaType, country: impl Into<String>) -> Self {
        Self {
            platform: platform.into().to_ascii_lowercase(),
            media_type,
            country: country.into().to_ascii_uppercase(),
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.platform, self.media_type, self.country)
    }
}

impl std::str::FromStr for JobKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let (Some(platform), Some(media), Some(country), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("invalid job key '{s}'"));
        };
        if platform.is_empty() || country.is_empty() {
            return Err(format!("invalid job key '{s}'"));
        }
        let media_type =
            MediaType::from_str(media).ok_or_else(|| format!("unknown media type '{media}'"))?;
        Ok(Self::new(platform, media_type, country))
    }
}

impl TryFrom<String> for JobKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobKey> for String {
    fn from(key: JobKey) -> Self {
        key.to_string()
    }
}

/// One entry of a scraped top list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedTitle {
    pub title: String,
    /// 1-based position in the source list.
    pub rank: u32,
    pub media_type: MediaType,
    pub platform: String,
    pub country: String,
}

/// External identifiers of a resolved title.
///
/// `tmdb_id` is the metadata service's id; series also carry the TVDb id
/// that the series manager keys its library on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalId {
    pub tmdb_id: u64,
    pub tvdb_id: Option<u64>,
    pub title: String,
    pub year: Option<i32>,
}

impl CanonicalId {
    /// The id the library manager for `media_type` references titles by.
    pub fn target_id(&self, media_type: MediaType) -> Option<u64> {
        match media_type {
            MediaType::Movie => Some(self.tmdb_id),
            MediaType::Series => self.tvdb_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Resolution {
    Resolved(CanonicalId),
    Unresolved { reason: String },
}

impl Resolution {
    pub fn unresolved(reason: impl Into<String>) -> Self {
        Self::Unresolved {
            reason: reason.into(),
        }
    }

    pub fn canonical(&self) -> Option<&CanonicalId> {
        match self {
            Self::Resolved(id) => Some(id),
            Self::Unresolved { .. } => None,
        }
    }
}

/// A ranked title together with its resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub title: RankedTitle,
    pub resolution: Resolution,
}
