//! HTTP routes for the stream service.
//!
//! Defines the Axum router and application state.

use crate::actors::{
    ChunkStorageEngine, ConnectionDispatcher, DispatcherHandle, SignalingCoordinator,
    SignalingHandle, StorageEngineHandle,
};
use crate::auth::{HeaderIdentityResolver, IdentityResolver};
use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_identity, IdentityState};
use crate::repositories::VideoStore;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// HTTP timeout for every route except chunk upload.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Recording store, also used directly for listings and deletes.
    pub store: Arc<dyn VideoStore>,

    pub dispatcher: DispatcherHandle,

    pub signaling: SignalingHandle,

    pub storage: StorageEngineHandle,

    /// Resolves the caller identity on protected routes.
    pub identity: Arc<dyn IdentityResolver>,
}

impl AppState {
    /// Spawn the three actors over `store` and assemble the state.
    ///
    /// Every actor runs on a child of `cancel_token`; cancelling it stops
    /// them all.
    pub fn spawn(
        config: Config,
        store: Arc<dyn VideoStore>,
        cancel_token: &CancellationToken,
    ) -> Self {
        let (dispatcher, disconnects, _dispatcher_task) =
            ConnectionDispatcher::spawn(cancel_token.child_token());
        let (signaling, _signaling_task) = SignalingCoordinator::spawn(
            dispatcher.clone(),
            disconnects,
            cancel_token.child_token(),
        );
        let (storage, _storage_task) = ChunkStorageEngine::spawn(
            Arc::clone(&store),
            config.storage,
            config.deadlines,
            cancel_token.child_token(),
        );
        let identity: Arc<dyn IdentityResolver> =
            Arc::new(HeaderIdentityResolver::new(config.identity_header.clone()));

        Self {
            config,
            store,
            dispatcher,
            signaling,
            storage,
            identity,
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe (simple "OK") - public
/// - `/ready` - Readiness probe (store ping) - public
/// - `/metrics` - Prometheus metrics endpoint - public
/// - `/api/video/:name`, `/api/video/playback/:name`, `/api/video/meta/:name` - public
/// - `/api/streams/active` - public
/// - `/api/video/chunk`, `/api/streams/old`, `/api/streams/:name`, `/api/ws` - identity required
/// - Request body limit for chunk uploads
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout on every route except chunk upload
///
/// Chunk upload is bounded by the ingest deadline instead: once queued, an
/// append commits whether or not the caller is still waiting.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let identity_state = Arc::new(IdentityState {
        resolver: Arc::clone(&state.identity),
    });
    let body_limit = state.config.max_chunk_body_bytes;

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/api/video/:name", get(handlers::download_video))
        .route("/api/video/playback/:name", get(handlers::playback_video))
        .route("/api/video/meta/:name", get(handlers::video_metadata))
        .route("/api/streams/active", get(handlers::active_streams))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route("/api/streams/old", get(handlers::old_streams))
        .route("/api/streams/:name", delete(handlers::delete_stream))
        .route("/api/ws", get(handlers::ws_handler))
        .route_layer(middleware::from_fn_with_state(
            identity_state.clone(),
            require_identity,
        ))
        .with_state(state.clone());

    let upload_routes = Router::new()
        .route("/api/video/chunk", post(handlers::upload_chunk))
        .route_layer(middleware::from_fn_with_state(
            identity_state,
            require_identity,
        ))
        .with_state(state);

    let timed_routes = public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)));

    // Layer order (bottom-to-top execution):
    // 1. Body limit (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware (outermost)
    timed_routes
        .merge(upload_routes)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
}
