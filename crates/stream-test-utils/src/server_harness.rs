//! Test server harness for E2E testing
//!
//! Provides `TestStreamServer` for spawning real stream service instances
//! over an in-memory recording store.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use stream_service::config::Config;
use stream_service::repositories::{InMemoryVideoStore, VideoStore};
use stream_service::routes::{self, AppState};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Chunk size used by [`TestStreamServer::spawn_small`].
pub const SMALL_CHUNK_SIZE: u64 = 16;

/// Section size used by [`TestStreamServer::spawn_small`].
pub const SMALL_SECTION_SIZE: u64 = 64;

/// Test harness for spawning the stream service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> anyhow::Result<()> {
///     let server = TestStreamServer::spawn().await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestStreamServer {
    addr: SocketAddr,
    store: Arc<InMemoryVideoStore>,
    state: Arc<AppState>,
    cancel_token: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestStreamServer {
    /// Spawn a server with default sizes.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(HashMap::new(), Arc::new(InMemoryVideoStore::new())).await
    }

    /// Spawn a server with 16 byte chunks and 64 byte sections.
    pub async fn spawn_small() -> Result<Self, anyhow::Error> {
        let vars = HashMap::from([
            (
                "STREAM_CHUNK_SIZE_BYTES".to_string(),
                SMALL_CHUNK_SIZE.to_string(),
            ),
            (
                "STREAM_SECTION_SIZE_BYTES".to_string(),
                SMALL_SECTION_SIZE.to_string(),
            ),
        ]);
        Self::spawn_with(vars, Arc::new(InMemoryVideoStore::new())).await
    }

    /// Spawn a server over `store`, with `vars` layered over the test
    /// defaults.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server and the three actors in the background
    pub async fn spawn_with(
        vars: HashMap<String, String>,
        store: Arc<InMemoryVideoStore>,
    ) -> Result<Self, anyhow::Error> {
        let mut env = HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://test/test".to_string(),
            ),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("STREAM_DRAIN_SECONDS".to_string(), "0".to_string()),
        ]);
        env.extend(vars);

        let config = Config::from_vars(&env)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let cancel_token = CancellationToken::new();
        let dyn_store: Arc<dyn VideoStore> = store.clone();
        let state = Arc::new(AppState::spawn(config, dyn_store, &cancel_token));

        // Local recorder handle; tests never install a global recorder.
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(Arc::clone(&state), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            store,
            state,
            cancel_token,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the signaling socket URL.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/api/ws", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the backing store, for seeding and fault injection.
    pub fn store(&self) -> &InMemoryVideoStore {
        &self.store
    }

    /// Get the shared application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.state.config
    }
}

impl Drop for TestStreamServer {
    fn drop(&mut self) {
        self._handle.abort();
        self.cancel_token.cancel();
    }
}
