//! Requester identity and catalog credentials
//!
//! Two capabilities live here:
//!
//! - [`IdentityProvider`] turns the inbound request's cookies and authorization
//!   header into an [`AuthContext`](crate::types::AuthContext): identity,
//!   attribute ids and credential wallet.
//! - [`TokenProbe`] checks that a catalog session token supplied in an export
//!   specification is still live before it is handed to the downloader.
//!
//! [`resolve_credential`] combines both with the specification's credential
//! hints into the single [`Credential`](crate::types::Credential) passed to the
//! downloader.

mod credentials;
mod probe;
mod provider;

pub use credentials::resolve_credential;
pub use probe::{SessionTokenProbe, TokenProbe};
pub use provider::{AnonymousProvider, IdentityProvider, WebauthnSessionProvider};

/// Raw authentication material taken from an inbound request
#[derive(Clone, Default)]
pub struct InboundCredentials {
    /// Full `Cookie` header value
    pub cookie_header: Option<String>,
    /// Full `Authorization` header value
    pub authorization: Option<String>,
}

impl InboundCredentials {
    /// Value of cookie `name`, if present
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookie_header.as_deref().and_then(|header| {
            header.split(';').find_map(|pair| {
                let (key, value) = pair.trim().split_once('=')?;
                (key.trim() == name && !value.is_empty()).then(|| value.trim().to_string())
            })
        })
    }

    /// Token of an `Authorization: Bearer` header, if present
    pub fn bearer_token(&self) -> Option<String> {
        let header = self.authorization.as_deref()?.trim();
        let (scheme, token) = header.split_once(' ')?;
        (scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty())
            .then(|| token.trim().to_string())
    }
}

impl std::fmt::Debug for InboundCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundCredentials")
            .field("cookie_header", &self.cookie_header.is_some())
            .field("authorization", &self.authorization.is_some())
            .finish()
    }
}
