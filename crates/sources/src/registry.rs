use std::collections::HashMap;
use std::sync::Arc;

use mediatrend_core::config::BrowserSettings;
use mediatrend_core::platform::{PLATFORMS, Strategy};

use crate::SourceError;
use crate::adapter::SourceAdapter;
use crate::browser::BrowserPool;
use crate::flixpatrol::FlixPatrol;
use crate::netflix::NetflixTudum;

/// Platform id to adapter.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    adapters: HashMap<&'static str, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One adapter per catalog platform; render-backed ones share `pool`.
    pub fn with_catalog(pool: Arc<BrowserPool>) -> Result<Self, SourceError> {
        let mut registry = Self::new();
        for platform in PLATFORMS {
            let adapter: Arc<dyn SourceAdapter> = match platform.strategy {
                Strategy::Http => Arc::new(NetflixTudum::new()?),
                Strategy::Rendered => Arc::new(FlixPatrol::new(platform, pool.clone())),
            };
            registry.register(adapter);
        }
        Ok(registry)
    }

    pub fn from_settings(browser: &BrowserSettings) -> Result<Self, SourceError> {
        Self::with_catalog(Arc::new(BrowserPool::new(browser)))
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.platform().id, adapter);
    }

    pub fn get(&self, platform: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .find(|(id, _)| id.eq_ignore_ascii_case(platform))
            .map(|(_, a)| a.clone())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
