//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`exports`]: export submission and artifact retrieval
//! - [`system`]: health and OpenAPI

use serde::{Deserialize, Serialize};

mod exports;
mod system;

pub use exports::*;
pub use system::*;

/// Query parameters for POST /export/:kind
#[derive(Debug, Default, Deserialize, Serialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExportQuery {
    /// Make the result retrievable by anyone ("true", "yes", "on" or "1")
    pub public: Option<String>,
}

impl ExportQuery {
    /// Whether the `public` flag is set
    pub fn is_public(&self) -> bool {
        self.public.as_deref().is_some_and(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "on" | "1" | "t" | "y"
            )
        })
    }
}
