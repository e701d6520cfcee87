//! Live stream and recording listing handlers.

use crate::auth::AuthenticatedUser;
use crate::errors::StreamError;
use crate::models::{validate_stream_name, OldStreamResponse, StreamInfo};
use crate::repositories::with_deadline;
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /api/streams/active
///
/// Snapshot of every stream declared by a joined participant.
#[instrument(skip_all, name = "stream.streams.active")]
pub async fn active_streams(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<StreamInfo>>, StreamError> {
    Ok(Json(state.signaling.active_streams().await?))
}

/// Handler for GET /api/streams/old
///
/// Persisted recordings whose name is not currently live.
#[instrument(skip_all, name = "stream.streams.old", fields(user_id = %user.user_id))]
pub async fn old_streams(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<OldStreamResponse>>, StreamError> {
    let active = state.signaling.active_streams().await?;
    let videos = with_deadline(
        "list_videos",
        state.config.deadlines.request,
        state.store.list_videos(),
    )
    .await?;

    let old = videos
        .into_iter()
        .filter(|video| {
            !active
                .iter()
                .any(|live| live.stream_name.eq_ignore_ascii_case(&video.name))
        })
        .map(|video| OldStreamResponse {
            name: video.name,
            streamer_id: video.streamer_id,
        })
        .collect();

    Ok(Json(old))
}

/// Handler for DELETE /api/streams/:name
///
/// Withdraws the caller's live stream of that name, then deletes the
/// caller's recording of it.
///
/// # Response
///
/// - 204 No Content when a recording was deleted
/// - 404 when the caller owns no recording of that name
#[instrument(skip_all, name = "stream.streams.delete", fields(name = %name, user_id = %user.user_id))]
pub async fn delete_stream(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
) -> Result<StatusCode, StreamError> {
    validate_stream_name(&name).map_err(StreamError::BadRequest)?;

    state.signaling.delete_stream(&user.user_id, &name).await?;

    let deleted = with_deadline(
        "delete_video",
        state.config.deadlines.request,
        state.store.delete_video(&name, &user.user_id),
    )
    .await?;

    if !deleted {
        return Err(StreamError::NotFound("Recording not found".to_string()));
    }

    tracing::info!(target: "stream.http", name = %name, user_id = %user.user_id, "Recording deleted");
    Ok(StatusCode::NO_CONTENT)
}
