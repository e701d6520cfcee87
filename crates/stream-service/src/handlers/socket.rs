//! WebSocket signaling session.
//!
//! One socket per upgrade. The socket is registered with the dispatcher
//! under the caller's identity; a writer task drains the socket's outbound
//! queue into the sink while the reader loop parses inbound frames and
//! forwards them to the signaling coordinator. Closing or failing the read
//! side unregisters the socket, which the coordinator sees as a Leave.

use crate::actors::ConnectionHandle;
use crate::auth::AuthenticatedUser;
use crate::errors::StreamError;
use crate::models::events::{ErrorEvent, InboundEvent, ERROR};
use crate::routes::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Extension,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Handler for GET /api/ws
#[instrument(skip_all, name = "stream.ws.upgrade", fields(user_id = %user.user_id))]
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, user, socket))
}

async fn handle_socket(state: Arc<AppState>, user: AuthenticatedUser, socket: WebSocket) {
    let (handle, mut outbound) = ConnectionHandle::new(state.config.connection_buffer);
    let connection_id = handle.id();

    if let Err(e) = state
        .dispatcher
        .register(handle.clone(), user.user_id.clone())
        .await
    {
        warn!(target: "stream.ws", error = %e, "Failed to register socket");
        return;
    }

    info!(
        target: "stream.ws",
        connection_id = %connection_id,
        user_id = %user.user_id,
        "Socket opened"
    );

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(incoming) = stream.next().await {
        match incoming {
            Ok(Message::Text(text)) => handle_frame(&state, &user, &handle, &text).await,
            Ok(Message::Binary(_)) => {
                reply_error(&state, &handle, "Binary frames are not supported".to_string()).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(e) => {
                debug!(
                    target: "stream.ws",
                    connection_id = %connection_id,
                    error = %e,
                    "Socket read failed"
                );
                break;
            }
        }
    }

    if let Err(e) = state.dispatcher.unregister(connection_id).await {
        warn!(target: "stream.ws", error = %e, "Failed to unregister socket");
    }
    drop(handle);
    writer.abort();

    info!(
        target: "stream.ws",
        connection_id = %connection_id,
        user_id = %user.user_id,
        "Socket closed"
    );
}

async fn handle_frame(
    state: &AppState,
    user: &AuthenticatedUser,
    handle: &ConnectionHandle,
    text: &str,
) {
    let event = match InboundEvent::parse(text) {
        Ok(event) => event,
        Err(message) => {
            debug!(
                target: "stream.ws",
                connection_id = %handle.id(),
                reason = %message,
                "Rejected inbound frame"
            );
            reply_error(state, handle, message).await;
            return;
        }
    };

    let uid = user.user_id.as_str();
    let result = match event {
        InboundEvent::Join(payload) => state.signaling.join(uid, payload.streams_info).await,
        InboundEvent::Leave => state.signaling.leave(uid).await,
        InboundEvent::SendingSignal(payload) => {
            state
                .signaling
                .signal(uid, payload.to_uid, payload.signal, payload.streams_info)
                .await
        }
        InboundEvent::ReturningSignal(payload) => {
            state
                .signaling
                .return_signal(uid, payload.caller_id, payload.signal, payload.streams_info)
                .await
        }
        InboundEvent::MotionUpdate(payload) => {
            state
                .signaling
                .motion_update(uid, payload.media_stream_id, payload.motion)
                .await
        }
    };

    if let Err(e) = result {
        warn!(
            target: "stream.ws",
            connection_id = %handle.id(),
            error = %e,
            "Failed to forward event to signaling"
        );
    }
}

async fn reply_error(state: &AppState, handle: &ConnectionHandle, message: String) {
    let result: Result<(), StreamError> = state
        .dispatcher
        .send_to(Some(handle.clone()), ERROR, &ErrorEvent { message })
        .await;
    if let Err(e) = result {
        warn!(target: "stream.ws", error = %e, "Failed to queue error reply");
    }
}
