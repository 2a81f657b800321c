//! Bounded pool of headless browser sessions.

use std::sync::Arc;
use std::time::Duration;

use mediatrend_core::config::BrowserSettings;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::SourceError;
use crate::netflix::USER_AGENT;
use crate::webdriver::{WebDriverClient, WebDriverSession};

pub struct BrowserPool {
    driver: WebDriverClient,
    semaphore: Arc<Semaphore>,
    max_sessions: usize,
    acquire_timeout: Duration,
    page_load_timeout: Duration,
}

impl BrowserPool {
    pub fn new(settings: &BrowserSettings) -> Self {
        let max_sessions = settings.max_sessions.max(1);
        Self {
            driver: WebDriverClient::new(&settings.webdriver_url),
            semaphore: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
            acquire_timeout: Duration::from_secs(settings.acquire_timeout_secs),
            page_load_timeout: Duration::from_secs(settings.page_load_timeout_secs),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Sessions currently leased.
    pub fn in_use(&self) -> usize {
        self.max_sessions - self.semaphore.available_permits()
    }

    /// Wait for a free slot, then open a browser session in it.
    pub async fn acquire(&self) -> Result<BrowserLease, SourceError> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| {
            SourceError::Browser(format!(
                "no browser session free within {}s",
                self.acquire_timeout.as_secs()
            ))
        })?
        .map_err(|_| SourceError::Browser("browser pool closed".into()))?;

        // The permit is dropped with the error, freeing the slot.
        let session = self
            .driver
            .new_session(self.page_load_timeout, USER_AGENT)
            .await?;

        debug!(session = session.id(), in_use = self.in_use(), "browser session leased");
        Ok(BrowserLease {
            session: Some(session),
            permit: Some(permit),
        })
    }
}

/// A leased session. Call [`BrowserLease::release`] when done; a lease that
/// is dropped instead deletes its session in the background.
pub struct BrowserLease {
    session: Option<WebDriverSession>,
    permit: Option<OwnedSemaphorePermit>,
}

impl BrowserLease {
    pub fn session(&self) -> Option<&WebDriverSession> {
        self.session.as_ref()
    }

    pub async fn release(mut self) {
        if let Some(session) = self.session.take() {
            let id = session.id().to_string();
            if let Err(e) = session.delete().await {
                warn!(session = %id, error = %e, "failed to delete browser session");
            }
        }
        self.permit.take();
    }
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let permit = self.permit.take();
        // Best-effort cleanup; the slot frees once the session is gone
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let id = session.id().to_string();
                    if let Err(e) = session.delete().await {
                        warn!(session = %id, error = %e, "failed to delete dropped browser session");
                    }
                    drop(permit);
                });
            }
            Err(_) => warn!(session = session.id(), "browser session leaked outside runtime"),
        }
    }
}
