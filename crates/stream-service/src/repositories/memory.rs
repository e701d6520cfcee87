//! In-memory recording store.
//!
//! Behaves like [`super::PgVideoStore`] (case-insensitive names, upserted
//! chunks, atomic commits) and adds fault injection for tests: an outage
//! switch and an artificial per-call latency.

use super::VideoStore;
use crate::errors::StreamError;
use crate::models::{ChunkWrite, VideoMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use common::types::VideoId;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    videos: HashMap<VideoId, VideoMetadata>,
    chunks: HashMap<VideoId, BTreeMap<u64, Bytes>>,
}

impl State {
    fn by_name(&self, name: &str) -> Option<&VideoMetadata> {
        let name = name.to_lowercase();
        self.videos.values().find(|v| v.name.to_lowercase() == name)
    }
}

/// Recording store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryVideoStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl InMemoryVideoStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a database error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Byte contents of every chunk of `name`, ordered by index.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no recording has that name.
    pub fn chunks_of(&self, name: &str) -> Result<Vec<(u64, Bytes)>, StreamError> {
        let state = self.lock()?;
        let video = state
            .by_name(name)
            .ok_or_else(|| StreamError::NotFound("Recording not found".to_string()))?;
        Ok(state
            .chunks
            .get(&video.id)
            .map(|chunks| chunks.iter().map(|(i, b)| (*i, b.clone())).collect())
            .unwrap_or_default())
    }

    /// Insert a recording and its chunks directly, bypassing ingestion.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the store lock is poisoned.
    pub fn seed(
        &self,
        name: &str,
        streamer_id: &str,
        chunks: Vec<Bytes>,
    ) -> Result<VideoMetadata, StreamError> {
        let now = Utc::now();
        let size = chunks.iter().map(|c| c.len() as u64).sum();
        let video = VideoMetadata {
            id: VideoId::new(),
            name: name.to_string(),
            streamer_id: streamer_id.to_string(),
            size_bytes: size,
            duration_seconds: 0,
            created_at: now,
            updated_at: now,
        };
        let mut state = self.lock()?;
        state.chunks.insert(
            video.id,
            chunks
                .into_iter()
                .enumerate()
                .map(|(i, b)| (i as u64, b))
                .collect(),
        );
        state.videos.insert(video.id, video.clone());
        Ok(video)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StreamError> {
        self.state
            .lock()
            .map_err(|_| StreamError::Internal("in-memory store lock poisoned".to_string()))
    }

    async fn enter(&self) -> Result<(), StreamError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StreamError::Database("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl VideoStore for InMemoryVideoStore {
    async fn ping(&self) -> Result<(), StreamError> {
        self.enter().await
    }

    async fn find_video(&self, name: &str) -> Result<Option<VideoMetadata>, StreamError> {
        self.enter().await?;
        Ok(self.lock()?.by_name(name).cloned())
    }

    async fn find_or_create_video(
        &self,
        name: &str,
        streamer_id: &str,
    ) -> Result<VideoMetadata, StreamError> {
        self.enter().await?;
        let mut state = self.lock()?;
        let video = match state.by_name(name) {
            Some(existing) => existing.clone(),
            None => {
                let now = Utc::now();
                let video = VideoMetadata {
                    id: VideoId::new(),
                    name: name.to_string(),
                    streamer_id: streamer_id.to_string(),
                    size_bytes: 0,
                    duration_seconds: 0,
                    created_at: now,
                    updated_at: now,
                };
                state.videos.insert(video.id, video.clone());
                video
            }
        };
        if video.streamer_id != streamer_id {
            return Err(StreamError::Conflict(format!(
                "Stream name '{name}' belongs to another streamer"
            )));
        }
        Ok(video)
    }

    async fn has_chunks(&self, video_id: VideoId) -> Result<bool, StreamError> {
        self.enter().await?;
        Ok(self
            .lock()?
            .chunks
            .get(&video_id)
            .is_some_and(|chunks| !chunks.is_empty()))
    }

    async fn fetch_chunk(
        &self,
        video_id: VideoId,
        index: u64,
    ) -> Result<Option<Bytes>, StreamError> {
        self.enter().await?;
        Ok(self
            .lock()?
            .chunks
            .get(&video_id)
            .and_then(|chunks| chunks.get(&index).cloned()))
    }

    async fn fetch_chunks(
        &self,
        video_id: VideoId,
        start: u64,
        end: u64,
    ) -> Result<Vec<(u64, Bytes)>, StreamError> {
        self.enter().await?;
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(self
            .lock()?
            .chunks
            .get(&video_id)
            .map(|chunks| {
                chunks
                    .range(start..end)
                    .map(|(i, b)| (*i, b.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit_ingest(
        &self,
        video_id: VideoId,
        writes: &[ChunkWrite],
        added_bytes: u64,
    ) -> Result<(), StreamError> {
        self.enter().await?;
        let mut state = self.lock()?;
        let State { videos, chunks } = &mut *state;

        let video = videos
            .get_mut(&video_id)
            .ok_or_else(|| StreamError::NotFound("Recording not found".to_string()))?;
        let stored = chunks.entry(video_id).or_default();
        for write in writes {
            stored.insert(write.index, write.bytes.clone());
        }

        let now = Utc::now();
        video.size_bytes += added_bytes;
        video.duration_seconds =
            i32::try_from((now - video.created_at).num_seconds().max(0)).unwrap_or(i32::MAX);
        video.updated_at = now;
        Ok(())
    }

    async fn list_videos(&self) -> Result<Vec<VideoMetadata>, StreamError> {
        self.enter().await?;
        let mut videos: Vec<_> = self.lock()?.videos.values().cloned().collect();
        videos.sort_by_key(|v| v.created_at);
        Ok(videos)
    }

    async fn delete_video(&self, name: &str, streamer_id: &str) -> Result<bool, StreamError> {
        self.enter().await?;
        let mut state = self.lock()?;
        let Some(id) = state
            .by_name(name)
            .filter(|v| v.streamer_id == streamer_id)
            .map(|v| v.id)
        else {
            return Ok(false);
        };
        state.videos.remove(&id);
        state.chunks.remove(&id);
        Ok(true)
    }
}
