//! HTTP and WebSocket request handlers for the stream service.

pub mod health;
pub mod metrics;
pub mod socket;
pub mod streams;
pub mod video;

pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
pub use socket::ws_handler;
pub use streams::{active_streams, delete_stream, old_streams};
pub use video::{download_video, playback_video, upload_chunk, video_metadata};
