use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use mediatrend_core::config::TargetSettings;
use mediatrend_core::types::CanonicalId;
use mediatrend_targets::radarr::Radarr;
use mediatrend_targets::sonarr::Sonarr;
use mediatrend_targets::{Submitted, TargetAdapter, TargetError};

const API_KEY: &str = "secret";

#[derive(Default)]
struct Library {
    movies: Mutex<Vec<Value>>,
    series: Mutex<Vec<Value>>,
    posts: Mutex<u32>,
    /// When set, presence checks report nothing, as if another client added the title meanwhile.
    hide_existing: Mutex<bool>,
}

type Shared = Arc<Library>;

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("X-Api-Key").and_then(|v| v.to_str().ok()) == Some(API_KEY)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Unauthorized" }))).into_response()
}

async fn list_movies(
    State(lib): State<Shared>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    if *lib.hide_existing.lock().unwrap() {
        return Json(json!([])).into_response();
    }
    let wanted: Option<u64> = q.get("tmdbId").and_then(|v| v.parse().ok());
    let movies = lib.movies.lock().unwrap();
    let hits: Vec<Value> = movies
        .iter()
        .filter(|m| wanted.is_none() || m["tmdbId"].as_u64() == wanted)
        .cloned()
        .collect();
    Json(Value::Array(hits)).into_response()
}

async fn add_movie(State(lib): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    *lib.posts.lock().unwrap() += 1;
    let tmdb_id = body["tmdbId"].as_u64().unwrap_or(0);
    if tmdb_id == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!([{ "propertyName": "TmdbId", "errorMessage": "'Tmdb Id' must be greater than '0'." }])),
        )
            .into_response();
    }
    if tmdb_id == 500 {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    let mut movies = lib.movies.lock().unwrap();
    if movies.iter().any(|m| m["tmdbId"].as_u64() == Some(tmdb_id)) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!([{
                "propertyName": "TmdbId",
                "errorMessage": "This movie has already been added",
                "errorCode": "MovieExistsValidator"
            }])),
        )
            .into_response();
    }
    let mut stored = body.clone();
    stored["id"] = json!(movies.len() + 1);
    movies.push(stored.clone());
    (StatusCode::CREATED, Json(stored)).into_response()
}

async fn list_series(
    State(lib): State<Shared>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let wanted: Option<u64> = q.get("tvdbId").and_then(|v| v.parse().ok());
    let series = lib.series.lock().unwrap();
    let hits: Vec<Value> = series
        .iter()
        .filter(|s| wanted.is_none() || s["tvdbId"].as_u64() == wanted)
        .cloned()
        .collect();
    Json(Value::Array(hits)).into_response()
}

async fn lookup_series(headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let term = q.get("term").cloned().unwrap_or_default();
    match term.strip_prefix("tvdb:").and_then(|id| id.parse::<u64>().ok()) {
        Some(81189) => Json(json!([{
            "title": "Breaking Bad",
            "tvdbId": 81189,
            "titleSlug": "breaking-bad",
            "seasons": [{ "seasonNumber": 1, "monitored": true }]
        }]))
        .into_response(),
        _ => Json(json!([])).into_response(),
    }
}

async fn add_series(State(lib): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    *lib.posts.lock().unwrap() += 1;
    let mut series = lib.series.lock().unwrap();
    let mut stored = body.clone();
    stored["id"] = json!(series.len() + 1);
    series.push(stored.clone());
    (StatusCode::CREATED, Json(stored)).into_response()
}

async fn spawn_arr() -> (String, Shared) {
    let lib = Shared::default();
    let app = Router::new()
        .route("/api/v3/movie", get(list_movies).post(add_movie))
        .route("/api/v3/series", get(list_series).post(add_series))
        .route("/api/v3/series/lookup", get(lookup_series))
        .route(
            "/api/v3/qualityprofile",
            get(|| async {
                Json(json!([
                    { "id": 4, "name": "HD-1080p" },
                    { "id": 1, "name": "Any" }
                ]))
            }),
        )
        .route(
            "/api/v3/rootfolder",
            get(|| async {
                Json(json!([
                    { "path": "/movies", "freeSpace": 1024 },
                    { "path": "" }
                ]))
            }),
        )
        .with_state(lib.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/"), lib)
}

fn settings(url: &str, api_key: &str) -> TargetSettings {
    TargetSettings {
        url: url.to_string(),
        api_key: api_key.to_string(),
        quality_profile_id: 4,
        root_folder_path: "/movies".into(),
        search_on_add: false,
    }
}

fn movie(tmdb_id: u64) -> CanonicalId {
    CanonicalId {
        tmdb_id,
        tvdb_id: None,
        title: format!("Movie {tmdb_id}"),
        year: Some(2024),
    }
}

#[tokio::test]
async fn submitting_twice_never_duplicates() {
    let (url, lib) = spawn_arr().await;
    let radarr = Radarr::new(&settings(&url, API_KEY)).unwrap();

    assert_eq!(radarr.submit(&movie(603)).await.unwrap(), Submitted::Added);
    assert_eq!(
        radarr.submit(&movie(603)).await.unwrap(),
        Submitted::AlreadyPresent
    );

    let movies = lib.movies.lock().unwrap();
    assert_eq!(movies.len(), 1);
    assert_eq!(movies[0]["qualityProfileId"], 4);
    assert_eq!(movies[0]["year"], 2024);
    assert_eq!(movies[0]["addOptions"]["searchForMovie"], false);
    assert_eq!(*lib.posts.lock().unwrap(), 1);
}

#[tokio::test]
async fn exists_rejection_counts_as_present() {
    let (url, lib) = spawn_arr().await;
    let radarr = Radarr::new(&settings(&url, API_KEY)).unwrap();
    radarr.submit(&movie(42)).await.unwrap();

    *lib.hide_existing.lock().unwrap() = true;
    assert_eq!(
        radarr.submit(&movie(42)).await.unwrap(),
        Submitted::AlreadyPresent
    );
    assert_eq!(lib.movies.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn failures_are_classified() {
    let (url, _lib) = spawn_arr().await;

    let bad_key = Radarr::new(&settings(&url, "wrong")).unwrap();
    let err = bad_key.submit(&movie(1)).await.unwrap_err();
    assert!(matches!(err, TargetError::Auth(_)));
    assert!(err.is_job_level());

    let radarr = Radarr::new(&settings(&url, API_KEY)).unwrap();
    let err = radarr.submit(&movie(0)).await.unwrap_err();
    assert!(matches!(err, TargetError::Validation(_)));
    assert!(!err.is_job_level());

    let err = radarr.submit(&movie(500)).await.unwrap_err();
    assert!(matches!(err, TargetError::Connectivity(_)));
    assert!(err.is_retryable());

    let unreachable = Radarr::new(&settings("http://127.0.0.1:1", API_KEY)).unwrap();
    let err = unreachable.submit(&movie(1)).await.unwrap_err();
    assert!(matches!(err, TargetError::Connectivity(_)));
}

#[tokio::test]
async fn profiles_and_folders_for_settings_ui() {
    let (url, _lib) = spawn_arr().await;
    let radarr = Radarr::new(&settings(&url, API_KEY)).unwrap();

    let profiles = radarr.quality_profiles().await.unwrap();
    let ids: Vec<_> = profiles.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 4]);

    let folders = radarr.root_folders().await.unwrap();
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].path, "/movies");
    assert_eq!(folders[0].free_space, Some(1024));
}

#[tokio::test]
async fn sonarr_adds_from_lookup_once() {
    let (url, lib) = spawn_arr().await;
    let sonarr = Sonarr::new(&settings(&url, API_KEY)).unwrap();
    let show = CanonicalId {
        tmdb_id: 1396,
        tvdb_id: Some(81189),
        title: "Breaking Bad".into(),
        year: Some(2008),
    };

    assert_eq!(sonarr.submit(&show).await.unwrap(), Submitted::Added);
    assert_eq!(sonarr.submit(&show).await.unwrap(), Submitted::AlreadyPresent);

    let series = lib.series.lock().unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0]["titleSlug"], "breaking-bad");
    assert_eq!(series[0]["addOptions"]["monitor"], "all");
    assert_eq!(series[0]["seasonFolder"], true);
}

#[tokio::test]
async fn sonarr_rejects_titles_it_cannot_find() {
    let (url, _lib) = spawn_arr().await;
    let sonarr = Sonarr::new(&settings(&url, API_KEY)).unwrap();

    let unknown = CanonicalId {
        tmdb_id: 1,
        tvdb_id: Some(999),
        title: "Unknown".into(),
        year: None,
    };
    assert!(matches!(
        sonarr.submit(&unknown).await,
        Err(TargetError::Validation(_))
    ));

    let no_tvdb = CanonicalId {
        tvdb_id: None,
        ..unknown
    };
    assert!(matches!(
        sonarr.submit(&no_tvdb).await,
        Err(TargetError::Validation(_))
    ));
}
