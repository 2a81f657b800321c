//! Minimal W3C WebDriver client (chromedriver, geckodriver, Selenium grid).
//!
//! Covers only the commands the rendered sources need: session lifecycle,
//! navigation, element lookup and click, page title and source.

use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::SourceError;

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum WebDriverError {
    #[error("webdriver unreachable: {0}")]
    Transport(String),
    #[error("webdriver {error}: {message}")]
    Command { error: String, message: String },
    #[error("unexpected webdriver response: {0}")]
    Protocol(String),
}

impl WebDriverError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Command { error, .. } if error == "timeout")
    }

    fn is_no_such_element(&self) -> bool {
        matches!(self, Self::Command { error, .. } if error == "no such element")
    }
}

impl From<WebDriverError> for SourceError {
    fn from(e: WebDriverError) -> Self {
        if e.is_timeout() {
            SourceError::Unavailable(e.to_string())
        } else {
            SourceError::Browser(e.to_string())
        }
    }
}

/// How to locate an element.
#[derive(Debug, Clone, Copy)]
pub enum Locator<'a> {
    Css(&'a str),
    XPath(&'a str),
}

impl Locator<'_> {
    fn to_json(self) -> Value {
        match self {
            Locator::Css(v) => json!({ "using": "css selector", "value": v }),
            Locator::XPath(v) => json!({ "using": "xpath", "value": v }),
        }
    }
}

#[derive(Clone)]
pub struct WebDriverClient {
    http: reqwest::Client,
    base_url: String,
}

impl WebDriverClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn command(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, WebDriverError> {
        let url = format!("{}{path}", self.base_url);
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| WebDriverError::Transport(e.to_string()))?;

        let status = resp.status();
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| WebDriverError::Protocol(e.to_string()))?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(WebDriverError::Command {
                error: value["error"].as_str().unwrap_or("unknown error").to_string(),
                message: value["message"].as_str().unwrap_or_default().to_string(),
            });
        }
        Ok(value)
    }

    /// Start a headless Chrome session.
    pub async fn new_session(
        &self,
        page_load_timeout: Duration,
        user_agent: &str,
    ) -> Result<WebDriverSession, WebDriverError> {
        let caps = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": [
                            "--headless=new",
                            "--disable-gpu",
                            "--no-sandbox",
                            "--disable-dev-shm-usage",
                            "--window-size=1920,1080",
                            format!("--user-agent={user_agent}"),
                        ]
                    },
                    "timeouts": { "pageLoad": page_load_timeout.as_millis() as u64 }
                }
            }
        });
        let value = self
            .command(reqwest::Method::POST, "/session", Some(caps))
            .await?;
        let id = value["sessionId"]
            .as_str()
            .ok_or_else(|| WebDriverError::Protocol("missing sessionId".into()))?
            .to_string();
        debug!(session = %id, "webdriver session created");
        Ok(WebDriverSession {
            client: self.clone(),
            id,
        })
    }
}

/// One live browser session. Must be ended with [`WebDriverSession::delete`].
pub struct WebDriverSession {
    client: WebDriverClient,
    id: String,
}

impl WebDriverSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn navigate(&self, url: &str) -> Result<(), WebDriverError> {
        self.client
            .command(
                reqwest::Method::POST,
                &format!("/session/{}/url", self.id),
                Some(json!({ "url": url })),
            )
            .await?;
        Ok(())
    }

    pub async fn title(&self) -> Result<String, WebDriverError> {
        let v = self
            .client
            .command(reqwest::Method::GET, &format!("/session/{}/title", self.id), None)
            .await?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }

    pub async fn source(&self) -> Result<String, WebDriverError> {
        let v = self
            .client
            .command(reqwest::Method::GET, &format!("/session/{}/source", self.id), None)
            .await?;
        v.as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| WebDriverError::Protocol("page source is not a string".into()))
    }

    /// Element reference, or `None` if nothing matches right now.
    pub async fn find(&self, locator: Locator<'_>) -> Result<Option<String>, WebDriverError> {
        let result = self
            .client
            .command(
                reqwest::Method::POST,
                &format!("/session/{}/element", self.id),
                Some(locator.to_json()),
            )
            .await;
        match result {
            Ok(v) => Ok(v[ELEMENT_KEY].as_str().map(|s| s.to_string())),
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Poll until an element matches or `timeout` passes.
    pub async fn wait_for(
        &self,
        locator: Locator<'_>,
        timeout: Duration,
    ) -> Result<Option<String>, WebDriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(el) = self.find(locator).await? {
                return Ok(Some(el));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn click(&self, element: &str) -> Result<(), WebDriverError> {
        self.client
            .command(
                reqwest::Method::POST,
                &format!("/session/{}/element/{element}/click", self.id),
                Some(json!({})),
            )
            .await?;
        Ok(())
    }

    pub async fn delete(self) -> Result<(), WebDriverError> {
        self.client
            .command(reqwest::Method::DELETE, &format!("/session/{}", self.id), None)
            .await?;
        debug!(session = %self.id, "webdriver session deleted");
        Ok(())
    }
}
