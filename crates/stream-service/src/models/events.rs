//! Socket wire format.
//!
//! Every frame in either direction is a JSON envelope `{event, data}`.
//! Outbound payloads are serialized once per fan-out by the dispatcher;
//! inbound frames are parsed and validated by the socket handler before
//! anything reaches an actor.

use super::{ParticipantStreams, StreamInfo};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Longest accepted opaque signal payload.
pub const MAX_SIGNAL_LENGTH: usize = 16 * 1024;

/// Most streams one participant may declare.
pub const MAX_STREAMS_PER_PARTICIPANT: usize = 16;

pub const WEBRTC_JOIN: &str = "WEBRTC_JOIN";
pub const WEBRTC_LEAVE: &str = "WEBRTC_LEAVE";
pub const WEBRTC_SENDING_SIGNAL: &str = "WEBRTC_SENDING_SIGNAL";
pub const WEBRTC_RETURNING_SIGNAL: &str = "WEBRTC_RETURNING_SIGNAL";
pub const WEBRTC_MOTION_UPDATE: &str = "WEBRTC_MOTION_UPDATE";

pub const WEBRTC_USER_JOINED: &str = "WEBRTC_USER_JOINED";
pub const WEBRTC_ALL_USERS: &str = "WEBRTC_ALL_USERS";
pub const WEBRTC_USER_LEFT: &str = "WEBRTC_USER_LEFT";
pub const WEBRTC_JOINED_SIGNAL: &str = "WEBRTC_JOINED_SIGNAL";
pub const WEBRTC_RETURN_SIGNAL_OUT: &str = "WEBRTC_RETURN_SIGNAL_OUT";
pub const CHANGE: &str = "CHANGE";
pub const ERROR: &str = "ERROR";

/// Outbound envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub event: &'a str,
    pub data: &'a serde_json::Value,
}

/// Inbound envelope before the payload is typed.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinPayload {
    #[serde(default)]
    pub streams_info: Vec<StreamInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendingSignalPayload {
    pub signal: String,
    pub to_uid: String,
    #[serde(default)]
    pub streams_info: Vec<StreamInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReturningSignalPayload {
    pub signal: String,
    pub caller_id: String,
    #[serde(default)]
    pub streams_info: Vec<StreamInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MotionUpdatePayload {
    pub media_stream_id: String,
    pub motion: bool,
}

/// A validated inbound socket event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Join(JoinPayload),
    Leave,
    SendingSignal(SendingSignalPayload),
    ReturningSignal(ReturningSignalPayload),
    MotionUpdate(MotionUpdatePayload),
}

impl InboundEvent {
    /// Parse and validate one text frame.
    ///
    /// # Errors
    ///
    /// Returns a client-facing message for malformed JSON, unknown events,
    /// missing fields or values outside the accepted limits.
    pub fn parse(text: &str) -> Result<Self, String> {
        let frame: InboundFrame =
            serde_json::from_str(text).map_err(|e| format!("Malformed frame: {e}"))?;

        let event = match frame.event.as_str() {
            WEBRTC_JOIN => InboundEvent::Join(payload(frame.data)?),
            WEBRTC_LEAVE => InboundEvent::Leave,
            WEBRTC_SENDING_SIGNAL => InboundEvent::SendingSignal(payload(frame.data)?),
            WEBRTC_RETURNING_SIGNAL => InboundEvent::ReturningSignal(payload(frame.data)?),
            WEBRTC_MOTION_UPDATE => InboundEvent::MotionUpdate(payload(frame.data)?),
            other => return Err(format!("Unknown event '{other}'")),
        };
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            InboundEvent::Join(p) => validate_streams(&p.streams_info),
            InboundEvent::Leave => Ok(()),
            InboundEvent::SendingSignal(p) => {
                validate_signal(&p.signal)?;
                require("to_uid", &p.to_uid)?;
                validate_streams(&p.streams_info)
            }
            InboundEvent::ReturningSignal(p) => {
                validate_signal(&p.signal)?;
                require("caller_id", &p.caller_id)?;
                validate_streams(&p.streams_info)
            }
            InboundEvent::MotionUpdate(p) => require("media_stream_id", &p.media_stream_id),
        }
    }
}

fn payload<T: DeserializeOwned>(data: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(data).map_err(|e| format!("Invalid payload: {e}"))
}

fn require(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{field} is required"));
    }
    Ok(())
}

fn validate_signal(signal: &str) -> Result<(), String> {
    require("signal", signal)?;
    if signal.len() > MAX_SIGNAL_LENGTH {
        return Err(format!("signal exceeds {MAX_SIGNAL_LENGTH} bytes"));
    }
    Ok(())
}

fn validate_streams(streams: &[StreamInfo]) -> Result<(), String> {
    if streams.len() > MAX_STREAMS_PER_PARTICIPANT {
        return Err(format!(
            "at most {MAX_STREAMS_PER_PARTICIPANT} streams may be declared"
        ));
    }
    for stream in streams {
        require("media_stream_id", &stream.media_stream_id)?;
        super::validate_stream_name(&stream.stream_name)?;
    }
    Ok(())
}

// ============================================================================
// Outbound payloads
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserJoined {
    pub uid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllUsers {
    pub users: Vec<ParticipantStreams>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserLeft {
    pub uid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalOffered {
    pub caller_id: String,
    pub signal: String,
    pub streams_info: Vec<StreamInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalReturned {
    pub uid: String,
    pub signal: String,
    pub streams_info: Vec<StreamInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MotionChanged {
    pub media_stream_id: String,
    pub motion: bool,
    pub streamer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEvent {
    pub message: String,
}

/// Entity named by a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeEntity {
    Stream,
}

/// Mutation named by a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeMethod {
    Insert,
    Update,
    Delete,
}

/// Generic non-signaling state change, broadcast as `CHANGE`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeNotification {
    pub entity: ChangeEntity,
    pub method: ChangeMethod,
    pub data: serde_json::Value,
}
