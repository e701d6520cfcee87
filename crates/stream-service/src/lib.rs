//! Stream Service Library
//!
//! Live signaling and chunked recording storage for camera streams:
//!
//! - WebSocket signaling between participants (join, leave, offer/answer
//!   relay, motion updates)
//! - Chunked ingestion of recorded media into Postgres
//! - Sectioned downloads and ranged playback of recordings
//!
//! # Architecture
//!
//! Three actors own all mutable state:
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> actors/{dispatcher,signaling,storage}.rs
//!                                           └── repositories/*.rs
//! ```
//!
//! # Modules
//!
//! - `actors` - Connection dispatcher, signaling coordinator, storage engine
//! - `auth` - Request identity resolution
//! - `chunks` - Chunk and byte-window arithmetic
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP and WebSocket handlers
//! - `middleware` - Identity and metrics middleware
//! - `models` - Data models and socket events
//! - `observability` - Prometheus metrics
//! - `repositories` - Recording store
//! - `routes` - Axum router setup

pub mod actors;
pub mod auth;
pub mod chunks;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
