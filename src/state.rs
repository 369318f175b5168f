//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::kv::KvStore;
use crate::upload::MultipartUploader;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    uploader: MultipartUploader,
}

impl AppState {
    /// Create a new application state on top of a connected store
    pub fn new(config: Config, store: Arc<dyn KvStore>) -> Self {
        let uploader = MultipartUploader::new(store, &config);
        Self {
            inner: Arc::new(AppStateInner { config, uploader }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn uploader(&self) -> &MultipartUploader {
        &self.inner.uploader
    }
}
