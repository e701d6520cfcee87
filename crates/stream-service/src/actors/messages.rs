//! Message types for actor communication.
//!
//! Fire-and-forget operations carry no reply slot. Synchronous queries
//! carry a `tokio::sync::oneshot` sender that the owning actor answers in
//! its turn.

use super::dispatcher::ConnectionHandle;
use crate::errors::StreamError;
use crate::models::StreamInfo;
use bytes::Bytes;
use common::types::ConnectionId;
use serde::Serialize;
use tokio::sync::oneshot;

/// An event ready for delivery: name plus a JSON payload.
///
/// The payload is converted to a `serde_json::Value` by the dispatcher
/// handle; the envelope text is produced once per fan-out.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub event: &'static str,
    pub data: serde_json::Value,
}

impl OutboundEvent {
    /// Build an event from any serializable payload.
    ///
    /// # Errors
    ///
    /// Returns the serialization error so the caller can log and drop it.
    pub fn new<T: Serialize>(event: &'static str, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event,
            data: serde_json::to_value(payload)?,
        })
    }
}

/// Messages sent to the Connection Dispatcher.
#[derive(Debug)]
pub enum DispatcherMessage {
    /// Record a live socket for `user_id`.
    Register {
        handle: ConnectionHandle,
        user_id: String,
    },

    /// Forget a socket; emits a disconnect notification for its identity.
    Unregister { connection_id: ConnectionId },

    /// Deliver to one socket. `None` is a no-op.
    SendTo {
        handle: Option<ConnectionHandle>,
        event: OutboundEvent,
    },

    /// Deliver to the earliest-registered socket of `user_id`.
    SendToUser {
        user_id: String,
        event: OutboundEvent,
    },

    /// Deliver to every socket whose identity is in `user_ids`.
    SendToUsers {
        user_ids: Vec<String>,
        event: OutboundEvent,
    },

    SendToAll {
        event: OutboundEvent,
    },

    SendToAllExcept {
        excluded_user_id: String,
        event: OutboundEvent,
    },

    /// Number of registered sockets.
    GetConnectionCount { respond_to: oneshot::Sender<usize> },
}

/// Messages sent to the Signaling Coordinator.
#[derive(Debug)]
pub enum SignalingMessage {
    /// Upsert a participant and announce it. Answered once both emissions
    /// have been handed to the dispatcher.
    Join {
        user_id: String,
        streams: Vec<StreamInfo>,
        respond_to: oneshot::Sender<()>,
    },

    Leave {
        user_id: String,
    },

    /// Relay an offer from `from_user_id` to `to_user_id`.
    Signal {
        from_user_id: String,
        to_user_id: String,
        signal: String,
        streams: Vec<StreamInfo>,
    },

    /// Relay an answer from `from_user_id` back to `caller_id`.
    ReturnSignal {
        from_user_id: String,
        caller_id: String,
        signal: String,
        streams: Vec<StreamInfo>,
    },

    MotionUpdate {
        user_id: String,
        media_stream_id: String,
        motion: bool,
    },

    DeleteStream {
        user_id: String,
        stream_name: String,
    },

    /// Every declared stream across every participant.
    GetActiveStreams {
        respond_to: oneshot::Sender<Vec<StreamInfo>>,
    },

    GetState {
        respond_to: oneshot::Sender<SignalingState>,
    },
}

/// Snapshot of the signaling registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingState {
    /// Participant identities, sorted.
    pub participants: Vec<String>,
    pub stream_count: usize,
}

/// Messages sent to the Chunk Storage Engine ingestion loop.
#[derive(Debug)]
pub enum StorageMessage {
    IngestChunk {
        name: String,
        streamer_id: String,
        data: Bytes,
        respond_to: oneshot::Sender<Result<(), StreamError>>,
    },
}
