//! `ChunkStorageEngine` - chunked recording ingestion and retrieval.
//!
//! Ingestion runs in a single actor so that every append derives its chunk
//! index from a size no other append is concurrently changing. Reads
//! (metadata, sectioned download, ranged playback) never mutate and run
//! directly on the caller's task under the request deadline.

use super::messages::StorageMessage;
use super::metrics::{ActorType, MailboxMonitor};
use crate::chunks::{plan_chunk_writes, playback_window, section_window, ByteRange};
use crate::config::{StorageLimits, StoreDeadlines};
use crate::errors::StreamError;
use crate::models::VideoMetadata;
use crate::observability::metrics as prom;
use crate::repositories::{timed, with_deadline, VideoStore};
use bytes::{Bytes, BytesMut};
use common::types::VideoId;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the ingestion mailbox.
const STORAGE_CHANNEL_BUFFER: usize = 100;

/// A download ready to stream: the recording plus its section body.
pub struct Download {
    pub metadata: VideoMetadata,
    /// Bytes announced up front as `Content-Length`.
    pub len: u64,
    pub body: BoxStream<'static, Result<Bytes, StreamError>>,
}

/// Bytes served by one playback request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSlice {
    pub bytes: Bytes,
    /// First byte (inclusive).
    pub start: u64,
    /// Last byte (exclusive).
    pub end: u64,
    /// Total recording size.
    pub size: u64,
}

/// Handle to the `ChunkStorageEngine`.
#[derive(Clone)]
pub struct StorageEngineHandle {
    sender: mpsc::Sender<StorageMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    store: Arc<dyn VideoStore>,
    limits: StorageLimits,
    deadlines: StoreDeadlines,
}

impl StorageEngineHandle {
    /// Append `data` to the recording `name`, creating it for
    /// `streamer_id` if needed.
    ///
    /// Returns once the append is committed (or has failed).
    pub async fn ingest(
        &self,
        name: &str,
        streamer_id: &str,
        data: Bytes,
    ) -> Result<(), StreamError> {
        if data.is_empty() {
            return Err(StreamError::BadRequest("Chunk body is empty".to_string()));
        }

        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        self.sender
            .send(StorageMessage::IngestChunk {
                name: name.to_string(),
                streamer_id: streamer_id.to_string(),
                data,
                respond_to: tx,
            })
            .await
            .map_err(|e| {
                self.mailbox.record_unsent();
                StreamError::Internal(format!("storage channel send failed: {e}"))
            })?;

        rx.await
            .map_err(|e| StreamError::Internal(format!("response receive failed: {e}")))?
    }

    /// Metadata of the recording `name`.
    pub async fn metadata(&self, name: &str) -> Result<VideoMetadata, StreamError> {
        with_deadline("find_video", self.deadlines.request, self.store.find_video(name))
            .await?
            .ok_or_else(|| StreamError::NotFound("Recording not found".to_string()))
    }

    /// Stream section `section` of the recording `name`.
    ///
    /// Each chunk read carries its own request deadline, so a long
    /// download is not cut off by the total transfer time.
    #[instrument(skip(self), fields(name = %name))]
    pub async fn download(&self, name: &str, section: u64) -> Result<Download, StreamError> {
        let metadata = self.metadata(name).await?;
        let window = section_window(metadata.size_bytes, section, self.limits)?;

        debug!(
            target: "stream.actor.storage",
            video_id = %metadata.id,
            size = metadata.size_bytes,
            start_index = window.start_index,
            budget = window.budget,
            "Starting download"
        );

        let body = section_stream(
            Arc::clone(&self.store),
            metadata.id,
            window.start_index,
            window.budget,
            self.deadlines.request,
        );

        Ok(Download {
            metadata,
            len: window.budget,
            body,
        })
    }

    /// Bytes of the recording `name` for an optional `Range` request.
    #[instrument(skip(self), fields(name = %name))]
    pub async fn playback(
        &self,
        name: &str,
        range: Option<ByteRange>,
    ) -> Result<PlaybackSlice, StreamError> {
        let metadata = self.metadata(name).await?;
        let size = metadata.size_bytes;
        let chunk_size = self.limits.chunk_size;
        let window = playback_window(size, range, chunk_size)?;

        if window.is_empty() {
            return Ok(PlaybackSlice {
                bytes: Bytes::new(),
                start: window.start,
                end: window.end,
                size,
            });
        }

        let chunks = with_deadline(
            "fetch_chunks",
            self.deadlines.request,
            self.store
                .fetch_chunks(metadata.id, window.first_chunk, window.end_chunk),
        )
        .await?;

        let mut joined = BytesMut::new();
        for (expected, (index, bytes)) in (window.first_chunk..).zip(&chunks) {
            if *index != expected {
                return Err(StreamError::Internal(format!(
                    "recording {} is missing chunk {expected}",
                    metadata.id
                )));
            }
            joined.extend_from_slice(bytes);
        }

        let offset = to_usize(window.offset_in_chunks(chunk_size))?;
        let len = to_usize(window.len())?;
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= joined.len())
            .ok_or_else(|| {
                StreamError::Internal(format!(
                    "recording {} chunks are shorter than its size",
                    metadata.id
                ))
            })?;

        let bytes = joined.freeze().slice(offset..end);
        prom::record_bytes_served("playback", bytes.len());

        Ok(PlaybackSlice {
            bytes,
            start: window.start,
            end: window.end,
            size,
        })
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn mailbox(&self) -> &MailboxMonitor {
        &self.mailbox
    }
}

fn to_usize(value: u64) -> Result<usize, StreamError> {
    usize::try_from(value)
        .map_err(|_| StreamError::Internal(format!("{value} exceeds addressable memory")))
}

struct SectionCursor {
    store: Arc<dyn VideoStore>,
    video_id: VideoId,
    next_index: u64,
    remaining: u64,
    deadline: Duration,
}

fn section_stream(
    store: Arc<dyn VideoStore>,
    video_id: VideoId,
    start_index: u64,
    budget: u64,
    deadline: Duration,
) -> BoxStream<'static, Result<Bytes, StreamError>> {
    let cursor = SectionCursor {
        store,
        video_id,
        next_index: start_index,
        remaining: budget,
        deadline,
    };

    stream::try_unfold(cursor, next_section_chunk).boxed()
}

async fn next_section_chunk(
    mut cursor: SectionCursor,
) -> Result<Option<(Bytes, SectionCursor)>, StreamError> {
    if cursor.remaining == 0 {
        return Ok(None);
    }

    let chunk = with_deadline(
        "fetch_chunk",
        cursor.deadline,
        cursor.store.fetch_chunk(cursor.video_id, cursor.next_index),
    )
    .await?
    .ok_or_else(|| {
        StreamError::Internal(format!(
            "recording {} is missing chunk {}",
            cursor.video_id, cursor.next_index
        ))
    })?;

    let take = usize::try_from(cursor.remaining)
        .unwrap_or(usize::MAX)
        .min(chunk.len());
    if take == 0 {
        return Err(StreamError::Internal(format!(
            "recording {} has an empty chunk {}",
            cursor.video_id, cursor.next_index
        )));
    }
    let piece = chunk.slice(..take);

    cursor.remaining -= take as u64;
    cursor.next_index += 1;
    prom::record_bytes_served("download", piece.len());
    Ok(Some((piece, cursor)))
}

/// The `ChunkStorageEngine` ingestion actor.
pub struct ChunkStorageEngine {
    receiver: mpsc::Receiver<StorageMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    store: Arc<dyn VideoStore>,
    limits: StorageLimits,
    deadlines: StoreDeadlines,
}

impl ChunkStorageEngine {
    /// Spawn the ingestion actor over `store`.
    pub fn spawn(
        store: Arc<dyn VideoStore>,
        limits: StorageLimits,
        deadlines: StoreDeadlines,
        cancel_token: CancellationToken,
    ) -> (StorageEngineHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(STORAGE_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Storage));

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            mailbox: Arc::clone(&mailbox),
            store: Arc::clone(&store),
            limits,
            deadlines,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = StorageEngineHandle {
            sender,
            cancel_token,
            mailbox,
            store,
            limits,
            deadlines,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "stream.actor.storage")]
    async fn run(mut self) {
        info!(
            target: "stream.actor.storage",
            chunk_size = self.limits.chunk_size,
            section_size = self.limits.section_size,
            "ChunkStorageEngine started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "stream.actor.storage",
                        "ChunkStorageEngine received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "stream.actor.storage",
                                "ChunkStorageEngine channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "stream.actor.storage",
            messages_processed = self.mailbox.messages_processed(),
            "ChunkStorageEngine stopped"
        );
    }

    async fn handle_message(&mut self, message: StorageMessage) {
        match message {
            StorageMessage::IngestChunk {
                name,
                streamer_id,
                data,
                respond_to,
            } => {
                let start = Instant::now();
                let len = data.len();
                let result = match tokio::time::timeout(
                    self.deadlines.ingest,
                    self.ingest(&name, &streamer_id, data),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StreamError::Timeout("ingest")),
                };

                let status = match &result {
                    Ok(()) => "success",
                    Err(e) => e.metric_status(),
                };
                prom::record_ingest(status, len, start.elapsed());

                if let Err(e) = &result {
                    warn!(
                        target: "stream.actor.storage",
                        name = %name,
                        streamer_id = %streamer_id,
                        bytes = len,
                        error = %e,
                        "Ingestion failed"
                    );
                }
                let _ = respond_to.send(result);
            }
        }
    }

    async fn ingest(&self, name: &str, streamer_id: &str, data: Bytes) -> Result<(), StreamError> {
        let chunk_size = self.limits.chunk_size;
        let video = timed(
            "find_or_create_video",
            self.store.find_or_create_video(name, streamer_id),
        )
        .await?;
        let has_chunks = timed("has_chunks", self.store.has_chunks(video.id)).await?;

        let tail = if has_chunks {
            timed(
                "fetch_chunk",
                self.store
                    .fetch_chunk(video.id, video.size_bytes / chunk_size),
            )
            .await?
            .unwrap_or_default()
        } else {
            Bytes::new()
        };

        let writes = plan_chunk_writes(video.size_bytes, has_chunks, &tail, &data, chunk_size);
        timed(
            "commit_ingest",
            self.store
                .commit_ingest(video.id, &writes, data.len() as u64),
        )
        .await?;

        debug!(
            target: "stream.actor.storage",
            video_id = %video.id,
            bytes = data.len(),
            chunks_written = writes.len(),
            size = video.size_bytes + data.len() as u64,
            "Chunk ingested"
        );
        Ok(())
    }
}
