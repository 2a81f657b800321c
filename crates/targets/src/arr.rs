//! REST plumbing shared by the Radarr and Sonarr v3 APIs.

use std::time::Duration;

use mediatrend_core::config::TargetSettings;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::TargetError;
use crate::adapter::{QualityProfile, RootFolder};

const GET_TIMEOUT: Duration = Duration::from_secs(10);
const POST_TIMEOUT: Duration = Duration::from_secs(20);

/// Result of a create request.
#[derive(Debug)]
pub enum Created {
    New(Value),
    AlreadyExists,
}

#[derive(Clone)]
pub struct ArrClient {
    name: &'static str,
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ArrClient {
    pub fn new(name: &'static str, settings: &TargetSettings) -> Result<Self, TargetError> {
        if !settings.is_configured() {
            return Err(TargetError::NotConfigured(name));
        }
        Ok(Self {
            name,
            http: reqwest::Client::new(),
            base_url: format!("{}/api/v3", settings.url.trim().trim_end_matches('/')),
            api_key: settings.api_key.trim().to_string(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, TargetError> {
        let url = format!("{}/{path}", self.base_url);
        debug!(target_service = self.name, url = %url, "GET");
        let resp = self
            .http
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .query(query)
            .timeout(GET_TIMEOUT)
            .send()
            .await
            .map_err(|e| TargetError::Connectivity(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify(status, &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| TargetError::Connectivity(format!("invalid JSON from {}: {e}", self.name)))
    }

    pub async fn post_json(&self, path: &str, payload: &Value) -> Result<Created, TargetError> {
        let url = format!("{}/{path}", self.base_url);
        debug!(target_service = self.name, url = %url, "POST");
        let resp = self
            .http
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .json(payload)
            .timeout(POST_TIMEOUT)
            .send()
            .await
            .map_err(|e| TargetError::Connectivity(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && is_already_exists(&body) {
            return Ok(Created::AlreadyExists);
        }
        if !status.is_success() {
            return Err(classify(status, &body));
        }
        Ok(Created::New(serde_json::from_str(&body).unwrap_or(Value::Null)))
    }

    pub async fn quality_profiles(&self) -> Result<Vec<QualityProfile>, TargetError> {
        let data = self.get_json("qualityprofile", &[]).await?;
        let mut profiles: Vec<QualityProfile> = data
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|p| {
                        Some(QualityProfile {
                            id: p["id"].as_i64()?,
                            name: p["name"].as_str().unwrap_or_default().to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        profiles.sort_by_key(|p| p.id);
        Ok(profiles)
    }

    pub async fn root_folders(&self) -> Result<Vec<RootFolder>, TargetError> {
        let data = self.get_json("rootfolder", &[]).await?;
        Ok(data
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|f| {
                        Some(RootFolder {
                            path: f["path"].as_str().filter(|p| !p.is_empty())?.to_string(),
                            free_space: f["freeSpace"].as_u64(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Map a non-success status to the failure taxonomy.
pub fn classify(status: StatusCode, body: &str) -> TargetError {
    let detail = error_message(body).unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TargetError::Auth(detail),
        s if s.is_server_error() => TargetError::Connectivity(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            TargetError::Connectivity(detail)
        }
        _ => TargetError::Validation(detail),
    }
}

/// Validation failures come back as a list of `{errorMessage, errorCode}` objects.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let messages: Vec<&str> = match &value {
        Value::Array(items) => items
            .iter()
            .filter_map(|i| i["errorMessage"].as_str())
            .collect(),
        Value::Object(_) => value["message"].as_str().into_iter().collect(),
        _ => Vec::new(),
    };
    if messages.is_empty() {
        None
    } else {
        Some(messages.join("; "))
    }
}

fn is_already_exists(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("already been added")
        || lower.contains("already exists")
        || lower.contains("existsvalidator")
}
