//! Application state for the API server

use crate::auth::IdentityProvider;
use crate::{Config, ExportService};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request; every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// Export driver and artifact responder
    pub service: ExportService,

    /// Configuration (read-only)
    pub config: Arc<Config>,

    /// Resolves the requester behind each request
    pub provider: Arc<dyn IdentityProvider>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(
        service: ExportService,
        config: Arc<Config>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            service,
            config,
            provider,
        }
    }
}
