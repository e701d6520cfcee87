//! Persistent storage for recordings.
//!
//! [`VideoStore`] is the seam between the chunk storage engine and the
//! relational store. [`PgVideoStore`] is the production implementation;
//! [`InMemoryVideoStore`] backs unit tests and the test server harness.

mod memory;
mod videos;

pub use memory::InMemoryVideoStore;
pub use videos::PgVideoStore;

use crate::errors::StreamError;
use crate::models::{ChunkWrite, VideoMetadata};
use crate::observability::metrics;
use async_trait::async_trait;
use bytes::Bytes;
use common::types::VideoId;
use std::future::Future;
use std::time::{Duration, Instant};

/// Storage operations used by the chunk storage engine and handlers.
#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Cheap round-trip used by the readiness probe.
    async fn ping(&self) -> Result<(), StreamError>;

    /// Look up a recording by name (case-insensitive).
    async fn find_video(&self, name: &str) -> Result<Option<VideoMetadata>, StreamError>;

    /// Return the recording for `name`, creating an empty one owned by
    /// `streamer_id` if none exists.
    ///
    /// Fails with `Conflict` when the name belongs to another streamer.
    async fn find_or_create_video(
        &self,
        name: &str,
        streamer_id: &str,
    ) -> Result<VideoMetadata, StreamError>;

    async fn has_chunks(&self, video_id: VideoId) -> Result<bool, StreamError>;

    async fn fetch_chunk(&self, video_id: VideoId, index: u64)
        -> Result<Option<Bytes>, StreamError>;

    /// Chunks with `start <= index < end`, ordered by index.
    async fn fetch_chunks(
        &self,
        video_id: VideoId,
        start: u64,
        end: u64,
    ) -> Result<Vec<(u64, Bytes)>, StreamError>;

    /// Apply every chunk write and add `added_bytes` to the recording size
    /// atomically. Also refreshes the recording duration.
    async fn commit_ingest(
        &self,
        video_id: VideoId,
        writes: &[ChunkWrite],
        added_bytes: u64,
    ) -> Result<(), StreamError>;

    async fn list_videos(&self) -> Result<Vec<VideoMetadata>, StreamError>;

    /// Delete the recording `name` owned by `streamer_id`, chunks included.
    ///
    /// Returns `false` when nothing matched.
    async fn delete_video(&self, name: &str, streamer_id: &str) -> Result<bool, StreamError>;
}

/// Run one store call, recording its duration and outcome.
pub(crate) async fn timed<T, F>(operation: &'static str, call: F) -> Result<T, StreamError>
where
    F: Future<Output = Result<T, StreamError>>,
{
    let start = Instant::now();
    let result = call.await;
    let status = match &result {
        Ok(_) => "success",
        Err(e) => e.metric_status(),
    };
    metrics::record_db_query(operation, status, start.elapsed());
    result
}

/// Run one store call under a deadline. Expiry drops the call, which
/// cancels the in-flight query.
pub(crate) async fn with_deadline<T, F>(
    operation: &'static str,
    deadline: Duration,
    call: F,
) -> Result<T, StreamError>
where
    F: Future<Output = Result<T, StreamError>>,
{
    let start = Instant::now();
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => {
            let status = match &result {
                Ok(_) => "success",
                Err(e) => e.metric_status(),
            };
            metrics::record_db_query(operation, status, start.elapsed());
            result
        }
        Err(_) => {
            metrics::record_db_query(operation, "timeout", start.elapsed());
            Err(StreamError::Timeout(operation))
        }
    }
}

fn to_db_int(value: u64) -> Result<i64, StreamError> {
    i64::try_from(value).map_err(|_| StreamError::Internal(format!("{value} exceeds BIGINT")))
}

fn from_db_int(value: i64) -> Result<u64, StreamError> {
    u64::try_from(value).map_err(|_| StreamError::Internal(format!("negative value {value}")))
}
