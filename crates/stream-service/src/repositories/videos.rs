//! Postgres-backed recording store.
//!
//! Tables (see `migrations/`):
//! - `vid_meta`: one row per recording, unique on `LOWER(name)`
//! - `vid_chunks`: `(vid_id, idx)` keyed chunk bytes, cascading on delete

use super::{from_db_int, to_db_int, VideoStore};
use crate::errors::StreamError;
use crate::models::{ChunkWrite, VideoMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use common::types::VideoId;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

const VIDEO_COLUMNS: &str =
    "id, name, streamer, size, duration_seconds, created_at, updated_at";

/// Recording store over a Postgres pool.
#[derive(Clone)]
pub struct PgVideoStore {
    pool: PgPool,
}

impl PgVideoStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn video_from_row(row: &PgRow) -> Result<VideoMetadata, StreamError> {
    Ok(VideoMetadata {
        id: VideoId(row.try_get("id")?),
        name: row.try_get("name")?,
        streamer_id: row.try_get("streamer")?,
        size_bytes: from_db_int(row.try_get("size")?)?,
        duration_seconds: row.try_get("duration_seconds")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl VideoStore for PgVideoStore {
    async fn ping(&self) -> Result<(), StreamError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(name = %name))]
    async fn find_video(&self, name: &str) -> Result<Option<VideoMetadata>, StreamError> {
        let row = sqlx::query(&format!(
            "SELECT {VIDEO_COLUMNS} FROM vid_meta WHERE LOWER(name) = LOWER($1)"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(video_from_row).transpose()
    }

    #[instrument(skip_all, fields(name = %name, streamer_id = %streamer_id))]
    async fn find_or_create_video(
        &self,
        name: &str,
        streamer_id: &str,
    ) -> Result<VideoMetadata, StreamError> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO vid_meta (name, streamer)
            VALUES ($1, $2)
            ON CONFLICT ((LOWER(name))) DO NOTHING
            RETURNING {VIDEO_COLUMNS}
            "#
        ))
        .bind(name)
        .bind(streamer_id)
        .fetch_optional(&self.pool)
        .await?;

        let video = match inserted {
            Some(row) => {
                let video = video_from_row(&row)?;
                tracing::info!(
                    target: "stream.repository",
                    video_id = %video.id,
                    name = %video.name,
                    "Created recording"
                );
                video
            }
            None => self
                .find_video(name)
                .await?
                .ok_or_else(|| StreamError::NotFound("Recording not found".to_string()))?,
        };

        if video.streamer_id != streamer_id {
            return Err(StreamError::Conflict(format!(
                "Stream name '{name}' belongs to another streamer"
            )));
        }
        Ok(video)
    }

    async fn has_chunks(&self, video_id: VideoId) -> Result<bool, StreamError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM vid_chunks WHERE vid_id = $1)")
                .bind(video_id.0)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn fetch_chunk(
        &self,
        video_id: VideoId,
        index: u64,
    ) -> Result<Option<Bytes>, StreamError> {
        let bytes: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT bytes FROM vid_chunks WHERE vid_id = $1 AND idx = $2")
                .bind(video_id.0)
                .bind(to_db_int(index)?)
                .fetch_optional(&self.pool)
                .await?;
        Ok(bytes.map(Bytes::from))
    }

    async fn fetch_chunks(
        &self,
        video_id: VideoId,
        start: u64,
        end: u64,
    ) -> Result<Vec<(u64, Bytes)>, StreamError> {
        let rows = sqlx::query(
            r#"
            SELECT idx, bytes
            FROM vid_chunks
            WHERE vid_id = $1 AND idx >= $2 AND idx < $3
            ORDER BY idx
            "#,
        )
        .bind(video_id.0)
        .bind(to_db_int(start)?)
        .bind(to_db_int(end)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(u64, Bytes), StreamError> {
                let index = from_db_int(row.try_get("idx")?)?;
                let bytes: Vec<u8> = row.try_get("bytes")?;
                Ok((index, Bytes::from(bytes)))
            })
            .collect()
    }

    #[instrument(skip_all, fields(video_id = %video_id, chunks = writes.len(), bytes = added_bytes))]
    async fn commit_ingest(
        &self,
        video_id: VideoId,
        writes: &[ChunkWrite],
        added_bytes: u64,
    ) -> Result<(), StreamError> {
        let mut tx = self.pool.begin().await?;

        // Locks the recording row before any chunk is written.
        let updated = sqlx::query(
            r#"
            UPDATE vid_meta
            SET size = size + $2,
                duration_seconds = GREATEST(0, EXTRACT(EPOCH FROM (NOW() - created_at)))::INT,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(video_id.0)
        .bind(to_db_int(added_bytes)?)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            // Recording was deleted while this upload was queued.
            return Err(StreamError::NotFound("Recording not found".to_string()));
        }

        for write in writes {
            sqlx::query(
                r#"
                INSERT INTO vid_chunks (vid_id, idx, bytes)
                VALUES ($1, $2, $3)
                ON CONFLICT (vid_id, idx) DO UPDATE SET bytes = EXCLUDED.bytes
                "#,
            )
            .bind(video_id.0)
            .bind(to_db_int(write.index)?)
            .bind(write.bytes.as_ref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_videos(&self) -> Result<Vec<VideoMetadata>, StreamError> {
        let rows = sqlx::query(&format!(
            "SELECT {VIDEO_COLUMNS} FROM vid_meta ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(video_from_row).collect()
    }

    #[instrument(skip_all, fields(name = %name, streamer_id = %streamer_id))]
    async fn delete_video(&self, name: &str, streamer_id: &str) -> Result<bool, StreamError> {
        let result =
            sqlx::query("DELETE FROM vid_meta WHERE LOWER(name) = LOWER($1) AND streamer = $2")
                .bind(name)
                .bind(streamer_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
