//! Stream service models.
//!
//! Data types shared between the actors, the repository and the HTTP
//! handlers. Socket wire types live in [`events`].

pub mod events;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::types::VideoId;
use serde::{Deserialize, Serialize};

/// Longest accepted stream name.
pub const MAX_STREAM_NAME_LENGTH: usize = 24;

/// One live media stream declared by a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub media_stream_id: String,

    /// Name under which the stream is recorded.
    #[serde(rename = "name")]
    pub stream_name: String,

    #[serde(default)]
    pub motion: bool,
}

/// A participant and the streams it currently declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantStreams {
    pub uid: String,
    pub streams_info: Vec<StreamInfo>,
}

/// Persisted metadata for one recording (`vid_meta`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub id: VideoId,
    pub name: String,
    pub streamer_id: String,
    /// Sum of the byte lengths of every stored chunk.
    pub size_bytes: u64,
    pub duration_seconds: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One chunk write produced by the ingestion planner.
///
/// Applied as an upsert keyed by `(video_id, index)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkWrite {
    pub index: u64,
    pub bytes: Bytes,
}

/// Validate a stream name taken from a path or query string.
///
/// # Errors
///
/// Returns a client-facing message describing the violation.
pub fn validate_stream_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Stream name is required".to_string());
    }
    if name.chars().count() > MAX_STREAM_NAME_LENGTH {
        return Err(format!(
            "Stream name must be at most {MAX_STREAM_NAME_LENGTH} characters"
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err("Stream name may contain only letters, digits, '-' and '_'".to_string());
    }
    Ok(())
}

/// Readiness check response (`/ready`).
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    /// "ready" or "not_ready".
    pub status: &'static str,

    /// Database connectivity status.
    pub database: &'static str,

    /// Error message (generic, no infrastructure details).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body for `GET /api/video/meta/:name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoMetaResponse {
    pub size: u64,
    pub seconds: i32,
}

/// One entry of `GET /api/streams/old`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OldStreamResponse {
    pub name: String,
    pub streamer_id: String,
}

/// Query parameters for `POST /api/video/chunk`.
#[derive(Debug, Deserialize)]
pub struct ChunkUploadQuery {
    #[serde(default)]
    pub name: String,
}

/// Query parameters for `GET /api/video/:name`.
#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    /// Section index; absent means section 0.
    #[serde(default, rename = "i")]
    pub section: Option<u64>,
}
