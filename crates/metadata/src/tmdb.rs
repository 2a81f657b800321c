//! TMDB (The Movie Database) provider client.
//!
//! Uses TMDB API v3: https://developer.themoviedb.org/docs

use std::time::Duration;

use mediatrend_core::types::MediaType;
use tracing::debug;

use crate::MetadataError;
use crate::provider::{MetadataProvider, SearchCandidate};

const BASE_URL: &str = "https://api.themoviedb.org/3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RESULTS: usize = 10;

pub struct TmdbClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl TmdbClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, BASE_URL)
    }

    pub fn with_base_url(api_key: String, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn get_json(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value, MetadataError> {
        if self.api_key.trim().is_empty() {
            return Err(MetadataError::NotConfigured);
        }

        let mut all_params = vec![("api_key", self.api_key.as_str())];
        all_params.extend_from_slice(params);

        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "TMDB request");

        let resp = self
            .client
            .get(&url)
            .query(&all_params)
            .send()
            .await
            .map_err(|e| MetadataError::Network(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MetadataError::NotFound);
        }

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(MetadataError::Unauthorized("TMDB rejected the API key".into()));
        }

        if !resp.status().is_success() {
            return Err(MetadataError::Provider(format!(
                "TMDB returned {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| MetadataError::Provider(format!("parse JSON: {e}")))
    }
}

#[async_trait::async_trait]
impl MetadataProvider for TmdbClient {
    fn name(&self) -> &str {
        "tmdb"
    }

    async fn search(
        &self,
        title: &str,
        media_type: MediaType,
        year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, MetadataError> {
        let (path, year_param) = match media_type {
            MediaType::Movie => ("/search/movie", "year"),
            MediaType::Series => ("/search/tv", "first_air_date_year"),
        };

        let mut params = vec![("query", title)];
        let year_str = year.map(|y| y.to_string());
        if let Some(ref y) = year_str {
            params.push((year_param, y));
        }

        let data = self.get_json(path, &params).await?;
        Ok(parse_search_results(&data, media_type))
    }

    async fn tvdb_id(&self, series_id: u64) -> Result<Option<u64>, MetadataError> {
        let data = self
            .get_json(&format!("/tv/{series_id}/external_ids"), &[])
            .await?;
        Ok(data["tvdb_id"].as_u64().filter(|id| *id > 0))
    }
}

/// Movies carry `title`/`release_date`, series `name`/`first_air_date`.
fn parse_search_results(data: &serde_json::Value, media_type: MediaType) -> Vec<SearchCandidate> {
    let (title_key, original_key, date_key) = match media_type {
        MediaType::Movie => ("title", "original_title", "release_date"),
        MediaType::Series => ("name", "original_name", "first_air_date"),
    };

    let Some(results) = data["results"].as_array() else {
        return Vec::new();
    };

    results
        .iter()
        .filter_map(|r| {
            let provider_id = r["id"].as_u64()?;
            let title = r[title_key].as_str()?.to_string();
            Some(SearchCandidate {
                provider_id,
                title,
                original_title: r[original_key].as_str().map(|s| s.to_string()),
                year: r[date_key]
                    .as_str()
                    .and_then(|d| d.get(..4))
                    .and_then(|y| y.parse().ok()),
                popularity: r["popularity"].as_f64().unwrap_or(0.0),
                vote_count: r["vote_count"].as_u64().unwrap_or(0),
            })
        })
        .take(MAX_RESULTS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediatrend_core::error::FailureKind;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    #[test]
    fn parse_movie_search_from_json() {
        let json = serde_json::json!({
            "results": [
                {
                    "id": 27205,
                    "title": "Inception",
                    "original_title": "Inception",
                    "release_date": "2010-07-16",
                    "popularity": 83.9,
                    "vote_count": 35000
                },
                { "id": 1, "title": "No Date" },
                { "title": "Missing id is skipped" }
            ]
        });

        let results = parse_search_results(&json, MediaType::Movie);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].provider_id, 27205);
        assert_eq!(results[0].year, Some(2010));
        assert_eq!(results[0].vote_count, 35000);
        assert!((results[0].popularity - 83.9).abs() < 0.01);
        assert_eq!(results[1].year, None);
        assert_eq!(results[1].vote_count, 0);
    }

    #[test]
    fn parse_series_search_from_json() {
        let json = serde_json::json!({
            "results": [
                {
                    "id": 1396,
                    "name": "Breaking Bad",
                    "original_name": "Breaking Bad",
                    "first_air_date": "2008-01-20",
                    "popularity": 400.1,
                    "vote_count": 12000
                }
            ]
        });

        let results = parse_search_results(&json, MediaType::Series);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Breaking Bad");
        assert_eq!(results[0].year, Some(2008));
    }

    #[test]
    fn parse_tolerates_missing_results() {
        assert!(parse_search_results(&serde_json::json!({}), MediaType::Movie).is_empty());
    }

    async fn stub_tmdb() -> String {
        let app = Router::new()
            .route(
                "/search/tv",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    if q.get("api_key").map(String::as_str) != Some("key") {
                        return (
                            StatusCode::UNAUTHORIZED,
                            Json(serde_json::json!({
                                "status_code": 7,
                                "status_message": "Invalid API key: You must be granted a valid key."
                            })),
                        );
                    }
                    (StatusCode::OK, Json(serde_json::json!({
                        "results": [{
                            "id": 1396,
                            "name": q.get("query").cloned().unwrap_or_default(),
                            "first_air_date": format!(
                                "{}-01-20",
                                q.get("first_air_date_year").cloned().unwrap_or("2008".into())
                            ),
                        }]
                    })))
                }),
            )
            .route(
                "/tv/1396/external_ids",
                get(|| async { Json(serde_json::json!({ "tvdb_id": 81189 })) }),
            )
            .route(
                "/tv/7/external_ids",
                get(|| async { Json(serde_json::json!({ "tvdb_id": null })) }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn search_and_external_ids_against_stub() {
        let base = stub_tmdb().await;
        let client = TmdbClient::with_base_url("key".into(), base);

        let found = client
            .search("Breaking Bad", MediaType::Series, Some(2009))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Breaking Bad");
        assert_eq!(found[0].year, Some(2009));

        assert_eq!(client.tvdb_id(1396).await.unwrap(), Some(81189));
        assert_eq!(client.tvdb_id(7).await.unwrap(), None);
        assert!(matches!(
            client.tvdb_id(8).await,
            Err(MetadataError::NotFound)
        ));
    }

    #[tokio::test]
    async fn rejected_key_is_unauthorized() {
        let base = stub_tmdb().await;
        let client = TmdbClient::with_base_url("stale".into(), base);

        let err = client
            .search("Breaking Bad", MediaType::Series, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::Unauthorized(_)));
        assert!(err.is_job_level());
        assert_eq!(err.failure_kind(), FailureKind::MetadataAuthFailed);
    }

    #[tokio::test]
    async fn empty_key_is_not_configured() {
        let client = TmdbClient::with_base_url(String::new(), "http://127.0.0.1:1");
        assert!(matches!(
            client.search("x", MediaType::Movie, None).await,
            Err(MetadataError::NotConfigured)
        ));
    }
}
