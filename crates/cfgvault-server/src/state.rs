//! Shared handler state

use cfgvault_cache::LocalFileStore;
use cfgvault_core::DistributionCoordinator;
use std::sync::Arc;

/// State handed to every route handler
#[derive(Debug, Clone)]
pub struct AppState {
    /// Record lifecycle and artifact distribution
    pub coordinator: Arc<DistributionCoordinator>,
    /// Uploaded files
    pub files: Arc<LocalFileStore>,
}

impl AppState {
    /// Create state
    #[must_use]
    pub fn new(coordinator: Arc<DistributionCoordinator>, files: Arc<LocalFileStore>) -> Self {
        Self { coordinator, files }
    }
}
