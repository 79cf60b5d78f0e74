//! Application state shared across request handlers.

use std::sync::Arc;

use crate::appliance::ApplianceManager;
use crate::image::ImageRegistry;

/// Shared application state.
///
/// Built once at startup and passed to all request handlers via Axum's
/// state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    appliances: Arc<ApplianceManager>,
    images: ImageRegistry,
}

impl AppState {
    /// Create a new application state.
    pub fn new(appliances: Arc<ApplianceManager>, images: ImageRegistry) -> Self {
        Self {
            inner: Arc::new(AppStateInner { appliances, images }),
        }
    }

    /// The appliance lifecycle manager.
    pub fn appliances(&self) -> &ApplianceManager {
        &self.inner.appliances
    }

    /// The image registry.
    pub fn images(&self) -> &ImageRegistry {
        &self.inner.images
    }
}
