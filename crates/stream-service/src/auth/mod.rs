//! Request identity resolution.
//!
//! Credentials are verified upstream; the service only needs the resulting
//! identity string. [`IdentityResolver`] is the seam, and
//! [`HeaderIdentityResolver`] reads the identity from a trusted header set
//! by the authenticating proxy.

use async_trait::async_trait;
use axum::http::HeaderMap;

/// The caller's identity, inserted into request extensions by
/// [`crate::middleware::require_identity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

/// Resolves the authenticated identity of a request.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Returns `None` when the request carries no usable identity.
    async fn resolve(&self, headers: &HeaderMap) -> Option<AuthenticatedUser>;
}

/// Trusts one header carrying the identity resolved upstream.
#[derive(Debug, Clone)]
pub struct HeaderIdentityResolver {
    header: String,
}

impl HeaderIdentityResolver {
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

#[async_trait]
impl IdentityResolver for HeaderIdentityResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Option<AuthenticatedUser> {
        let value = headers.get(self.header.as_str())?.to_str().ok()?.trim();
        if value.is_empty() {
            return None;
        }
        Some(AuthenticatedUser {
            user_id: value.to_string(),
        })
    }
}
