//! # Stream Test Utilities
//!
//! Shared test utilities for the stream service.
//!
//! This crate provides:
//! - Server test harness (`TestStreamServer` for E2E tests)
//! - WebSocket signaling client (`WsClient`)
//! - Byte fixtures for recordings
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stream_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestStreamServer::spawn().await?;
//!     let response = reqwest::get(format!("{}/health", server.url())).await?;
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod server_harness;
pub mod ws_client;

// Re-export commonly used items
pub use fixtures::*;
pub use server_harness::*;
pub use ws_client::*;
