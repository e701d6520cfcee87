//! Identity middleware for protected routes.
//!
//! Resolves the caller through the configured [`IdentityResolver`] and
//! injects [`AuthenticatedUser`] into request extensions for downstream
//! handlers.

use crate::auth::{AuthenticatedUser, IdentityResolver};
use crate::errors::StreamError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the identity middleware.
#[derive(Clone)]
pub struct IdentityState {
    pub resolver: Arc<dyn IdentityResolver>,
}

/// Require a resolved identity.
///
/// # Response
///
/// - Returns 401 Unauthorized if no identity can be resolved
/// - Continues to next handler with `AuthenticatedUser` in extensions
#[instrument(skip_all, name = "stream.middleware.identity")]
pub async fn require_identity(
    State(state): State<Arc<IdentityState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, StreamError> {
    let user: AuthenticatedUser =
        state
            .resolver
            .resolve(req.headers())
            .await
            .ok_or_else(|| {
                tracing::debug!(target: "stream.middleware.identity", "No identity on request");
                StreamError::Unauthorized("Missing caller identity".to_string())
            })?;

    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}
