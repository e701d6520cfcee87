//! `SignalingCoordinator` - owns the live participant roster.
//!
//! Each participant is keyed by identity and carries the streams it last
//! declared. The coordinator relays offers and answers by identity without
//! looking at the signal contents, and announces roster changes through
//! the dispatcher.
//!
//! Lost connections arrive on the dispatcher's disconnect feed and are
//! handled exactly like an explicit Leave.

use super::dispatcher::{DisconnectFeed, DispatcherHandle};
use super::messages::{SignalingMessage, SignalingState};
use super::metrics::{ActorType, MailboxMonitor};
use crate::errors::StreamError;
use crate::models::events::{
    AllUsers, ChangeEntity, ChangeMethod, MotionChanged, SignalOffered, SignalReturned, UserJoined,
    UserLeft, WEBRTC_ALL_USERS, WEBRTC_JOINED_SIGNAL, WEBRTC_MOTION_UPDATE,
    WEBRTC_RETURN_SIGNAL_OUT, WEBRTC_USER_JOINED, WEBRTC_USER_LEFT,
};
use crate::models::{ParticipantStreams, StreamInfo};
use crate::observability::metrics as prom;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the signaling mailbox.
const SIGNALING_CHANNEL_BUFFER: usize = 500;

/// Handle to the `SignalingCoordinator`.
#[derive(Clone)]
pub struct SignalingHandle {
    sender: mpsc::Sender<SignalingMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl SignalingHandle {
    async fn send(&self, message: SignalingMessage) -> Result<(), StreamError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).await.map_err(|e| {
            self.mailbox.record_unsent();
            StreamError::Internal(format!("signaling channel send failed: {e}"))
        })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SignalingMessage,
    ) -> Result<T, StreamError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await
            .map_err(|e| StreamError::Internal(format!("response receive failed: {e}")))
    }

    /// Join (or re-join) with the given streams.
    ///
    /// Returns once the roster is updated and both announcements have been
    /// handed to the dispatcher.
    pub async fn join(&self, user_id: &str, streams: Vec<StreamInfo>) -> Result<(), StreamError> {
        self.request(|respond_to| SignalingMessage::Join {
            user_id: user_id.to_string(),
            streams,
            respond_to,
        })
        .await
    }

    pub async fn leave(&self, user_id: &str) -> Result<(), StreamError> {
        self.send(SignalingMessage::Leave {
            user_id: user_id.to_string(),
        })
        .await
    }

    /// Relay an offer to `to_user_id`.
    pub async fn signal(
        &self,
        from_user_id: &str,
        to_user_id: String,
        signal: String,
        streams: Vec<StreamInfo>,
    ) -> Result<(), StreamError> {
        self.send(SignalingMessage::Signal {
            from_user_id: from_user_id.to_string(),
            to_user_id,
            signal,
            streams,
        })
        .await
    }

    /// Relay an answer back to `caller_id`.
    pub async fn return_signal(
        &self,
        from_user_id: &str,
        caller_id: String,
        signal: String,
        streams: Vec<StreamInfo>,
    ) -> Result<(), StreamError> {
        self.send(SignalingMessage::ReturnSignal {
            from_user_id: from_user_id.to_string(),
            caller_id,
            signal,
            streams,
        })
        .await
    }

    pub async fn motion_update(
        &self,
        user_id: &str,
        media_stream_id: String,
        motion: bool,
    ) -> Result<(), StreamError> {
        self.send(SignalingMessage::MotionUpdate {
            user_id: user_id.to_string(),
            media_stream_id,
            motion,
        })
        .await
    }

    /// Withdraw one of `user_id`'s live streams by name.
    pub async fn delete_stream(&self, user_id: &str, stream_name: &str) -> Result<(), StreamError> {
        self.send(SignalingMessage::DeleteStream {
            user_id: user_id.to_string(),
            stream_name: stream_name.to_string(),
        })
        .await
    }

    /// Every declared stream across every participant.
    pub async fn active_streams(&self) -> Result<Vec<StreamInfo>, StreamError> {
        self.request(|respond_to| SignalingMessage::GetActiveStreams { respond_to })
            .await
    }

    pub async fn get_state(&self) -> Result<SignalingState, StreamError> {
        self.request(|respond_to| SignalingMessage::GetState { respond_to })
            .await
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

/// The `SignalingCoordinator` implementation.
pub struct SignalingCoordinator {
    receiver: mpsc::Receiver<SignalingMessage>,
    disconnects: Option<DisconnectFeed>,
    dispatcher: DispatcherHandle,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    participants: HashMap<String, Vec<StreamInfo>>,
}

impl SignalingCoordinator {
    /// Spawn the coordinator, consuming the dispatcher's disconnect feed.
    pub fn spawn(
        dispatcher: DispatcherHandle,
        disconnects: DisconnectFeed,
        cancel_token: CancellationToken,
    ) -> (SignalingHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SIGNALING_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Signaling));

        let actor = Self {
            receiver,
            disconnects: Some(disconnects),
            dispatcher,
            cancel_token: cancel_token.clone(),
            mailbox: Arc::clone(&mailbox),
            participants: HashMap::new(),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SignalingHandle {
            sender,
            cancel_token,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "stream.actor.signaling")]
    async fn run(mut self) {
        info!(target: "stream.actor.signaling", "SignalingCoordinator started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "stream.actor.signaling",
                        "SignalingCoordinator received cancellation signal"
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
                                target: "stream.actor.signaling",
                                "SignalingCoordinator channel closed, exiting"
                            );
                            break;
                        }
                    }
                }

                disconnected = next_disconnect(&mut self.disconnects) => {
                    match disconnected {
                        Some(user_id) => {
                            debug!(
                                target: "stream.actor.signaling",
                                user_id = %user_id,
                                "Disconnect treated as leave"
                            );
                            self.handle_leave(&user_id).await;
                        }
                        None => self.disconnects = None,
                    }
                }
            }
        }

        info!(
            target: "stream.actor.signaling",
            participants = self.participants.len(),
            messages_processed = self.mailbox.messages_processed(),
            "SignalingCoordinator stopped"
        );
    }

    async fn handle_message(&mut self, message: SignalingMessage) {
        match message {
            SignalingMessage::Join {
                user_id,
                streams,
                respond_to,
            } => {
                self.handle_join(user_id, streams).await;
                let _ = respond_to.send(());
            }

            SignalingMessage::Leave { user_id } => {
                self.handle_leave(&user_id).await;
            }

            SignalingMessage::Signal {
                from_user_id,
                to_user_id,
                signal,
                streams,
            } => {
                let payload = SignalOffered {
                    caller_id: from_user_id,
                    signal,
                    streams_info: streams,
                };
                report(
                    WEBRTC_JOINED_SIGNAL,
                    self.dispatcher
                        .send_to_user(&to_user_id, WEBRTC_JOINED_SIGNAL, &payload)
                        .await,
                );
            }

            SignalingMessage::ReturnSignal {
                from_user_id,
                caller_id,
                signal,
                streams,
            } => {
                let payload = SignalReturned {
                    uid: from_user_id,
                    signal,
                    streams_info: streams,
                };
                report(
                    WEBRTC_RETURN_SIGNAL_OUT,
                    self.dispatcher
                        .send_to_user(&caller_id, WEBRTC_RETURN_SIGNAL_OUT, &payload)
                        .await,
                );
            }

            SignalingMessage::MotionUpdate {
                user_id,
                media_stream_id,
                motion,
            } => {
                self.handle_motion(user_id, media_stream_id, motion).await;
            }

            SignalingMessage::DeleteStream {
                user_id,
                stream_name,
            } => {
                self.handle_delete_stream(&user_id, stream_name).await;
            }

            SignalingMessage::GetActiveStreams { respond_to } => {
                let streams = self.participants.values().flatten().cloned().collect();
                let _ = respond_to.send(streams);
            }

            SignalingMessage::GetState { respond_to } => {
                let mut participants: Vec<String> = self.participants.keys().cloned().collect();
                participants.sort();
                let stream_count = self.participants.values().map(Vec::len).sum();
                let _ = respond_to.send(SignalingState {
                    participants,
                    stream_count,
                });
            }
        }
    }

    async fn handle_join(&mut self, user_id: String, streams: Vec<StreamInfo>) {
        let others: Vec<ParticipantStreams> = self
            .participants
            .iter()
            .filter(|(uid, _)| **uid != user_id)
            .map(|(uid, streams)| ParticipantStreams {
                uid: uid.clone(),
                streams_info: streams.clone(),
            })
            .collect();

        info!(
            target: "stream.actor.signaling",
            user_id = %user_id,
            streams = streams.len(),
            peers = others.len(),
            "Participant joined"
        );

        if !others.is_empty() {
            let recipients = others.iter().map(|p| p.uid.clone()).collect();
            report(
                WEBRTC_USER_JOINED,
                self.dispatcher
                    .send_to_users(
                        recipients,
                        WEBRTC_USER_JOINED,
                        &UserJoined {
                            uid: user_id.clone(),
                        },
                    )
                    .await,
            );
        }

        report(
            WEBRTC_ALL_USERS,
            self.dispatcher
                .send_to_user(&user_id, WEBRTC_ALL_USERS, &AllUsers { users: others })
                .await,
        );

        self.participants.insert(user_id, streams);
        prom::set_participants_active(self.participants.len());
    }

    async fn handle_leave(&mut self, user_id: &str) {
        if self.participants.remove(user_id).is_none() {
            return;
        }
        prom::set_participants_active(self.participants.len());

        info!(
            target: "stream.actor.signaling",
            user_id = %user_id,
            remaining = self.participants.len(),
            "Participant left"
        );

        if self.participants.is_empty() {
            return;
        }
        let remaining = self.participants.keys().cloned().collect();
        report(
            WEBRTC_USER_LEFT,
            self.dispatcher
                .send_to_users(
                    remaining,
                    WEBRTC_USER_LEFT,
                    &UserLeft {
                        uid: user_id.to_string(),
                    },
                )
                .await,
        );
    }

    async fn handle_motion(&mut self, user_id: String, media_stream_id: String, motion: bool) {
        let Some(streams) = self.participants.get_mut(&user_id) else {
            debug!(
                target: "stream.actor.signaling",
                user_id = %user_id,
                "Motion update from non-participant ignored"
            );
            return;
        };
        if let Some(stream) = streams
            .iter_mut()
            .find(|s| s.media_stream_id == media_stream_id)
        {
            stream.motion = motion;
        }

        let payload = MotionChanged {
            media_stream_id,
            motion,
            streamer_id: user_id,
        };
        report(
            WEBRTC_MOTION_UPDATE,
            self.dispatcher
                .send_to_all_except(&payload.streamer_id, WEBRTC_MOTION_UPDATE, &payload)
                .await,
        );
    }

    async fn handle_delete_stream(&mut self, user_id: &str, stream_name: String) {
        if let Some(streams) = self.participants.get_mut(user_id) {
            if let Some(position) = streams.iter().position(|s| s.stream_name == stream_name) {
                streams.swap_remove(position);
                info!(
                    target: "stream.actor.signaling",
                    user_id = %user_id,
                    stream_name = %stream_name,
                    "Live stream withdrawn"
                );
            }
        }

        report(
            "CHANGE",
            self.dispatcher
                .broadcast_change(
                    ChangeEntity::Stream,
                    ChangeMethod::Delete,
                    &serde_json::json!({ "name": stream_name }),
                )
                .await,
        );
    }
}

/// Wait for the next disconnect; pending forever once the feed is gone.
async fn next_disconnect(feed: &mut Option<DisconnectFeed>) -> Option<String> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

fn report(event: &'static str, result: Result<(), StreamError>) {
    if let Err(e) = result {
        warn!(
            target: "stream.actor.signaling",
            event,
            error = %e,
            "Failed to hand event to dispatcher"
        );
    }
}
