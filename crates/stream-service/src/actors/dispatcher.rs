//! `ConnectionDispatcher` - owns the live socket registry.
//!
//! Maps each live socket to the identity that opened it and provides the
//! addressed and broadcast delivery primitives every other component uses.
//! The registry is only touched inside the actor loop, so a registration
//! change can never interleave with a broadcast enumeration.
//!
//! Delivery to a socket is a non-blocking `try_send` onto that socket's
//! outbound queue. A full or closed queue drops the frame for that
//! recipient only.

use super::messages::{DispatcherMessage, OutboundEvent};
use super::metrics::{ActorType, MailboxMonitor};
use crate::errors::StreamError;
use crate::models::events::{ChangeEntity, ChangeMethod, ChangeNotification, Envelope, CHANGE};
use crate::observability::metrics as prom;
use common::types::ConnectionId;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the dispatcher mailbox.
const DISPATCHER_CHANNEL_BUFFER: usize = 1024;

/// Write side of one live socket.
///
/// Cloning shares the same outbound queue; the socket task owns the
/// receiving end and forwards frames to the wire.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<String>,
}

impl ConnectionHandle {
    /// Create a handle with an outbound queue of `buffer` frames.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (outbound, receiver) = mpsc::channel(buffer.max(1));
        (
            Self {
                id: ConnectionId::new(),
                outbound,
            },
            receiver,
        )
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    fn deliver(&self, frame: &str) -> Result<(), &'static str> {
        self.outbound.try_send(frame.to_string()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => "outbound queue full",
            mpsc::error::TrySendError::Closed(_) => "socket closed",
        })
    }
}

/// Identity of every unregistered socket, in unregistration order.
///
/// Published once per Unregister, even when the identity still has other
/// live sockets. Consumed by the Signaling Coordinator, which treats each
/// entry as a Leave. Unbounded so a disconnect is never lost to backpressure.
#[derive(Debug)]
pub struct DisconnectFeed {
    receiver: mpsc::UnboundedReceiver<String>,
}

impl DisconnectFeed {
    /// Next disconnected identity, or `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

/// Handle to the `ConnectionDispatcher`.
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<DispatcherMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl DispatcherHandle {
    async fn send(&self, message: DispatcherMessage) -> Result<(), StreamError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).await.map_err(|e| {
            self.mailbox.record_unsent();
            StreamError::Internal(format!("dispatcher channel send failed: {e}"))
        })
    }

    /// Record a live socket for `user_id`.
    pub async fn register(
        &self,
        handle: ConnectionHandle,
        user_id: String,
    ) -> Result<(), StreamError> {
        self.send(DispatcherMessage::Register { handle, user_id }).await
    }

    /// Forget a socket. If it belonged to an identity, that identity is
    /// published on the disconnect feed.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Result<(), StreamError> {
        self.send(DispatcherMessage::Unregister { connection_id })
            .await
    }

    /// Deliver to one socket. `None` is a no-op.
    pub async fn send_to<T: Serialize>(
        &self,
        handle: Option<ConnectionHandle>,
        event: &'static str,
        payload: &T,
    ) -> Result<(), StreamError> {
        let Some(event) = encode(event, payload) else {
            return Ok(());
        };
        self.send(DispatcherMessage::SendTo { handle, event }).await
    }

    /// Deliver to the identity's socket (the earliest registered if it
    /// holds several).
    pub async fn send_to_user<T: Serialize>(
        &self,
        user_id: &str,
        event: &'static str,
        payload: &T,
    ) -> Result<(), StreamError> {
        let Some(event) = encode(event, payload) else {
            return Ok(());
        };
        self.send(DispatcherMessage::SendToUser {
            user_id: user_id.to_string(),
            event,
        })
        .await
    }

    /// Deliver to every socket whose identity is in `user_ids`.
    pub async fn send_to_users<T: Serialize>(
        &self,
        user_ids: Vec<String>,
        event: &'static str,
        payload: &T,
    ) -> Result<(), StreamError> {
        let Some(event) = encode(event, payload) else {
            return Ok(());
        };
        self.send(DispatcherMessage::SendToUsers { user_ids, event })
            .await
    }

    pub async fn send_to_all<T: Serialize>(
        &self,
        event: &'static str,
        payload: &T,
    ) -> Result<(), StreamError> {
        let Some(event) = encode(event, payload) else {
            return Ok(());
        };
        self.send(DispatcherMessage::SendToAll { event }).await
    }

    pub async fn send_to_all_except<T: Serialize>(
        &self,
        excluded_user_id: &str,
        event: &'static str,
        payload: &T,
    ) -> Result<(), StreamError> {
        let Some(event) = encode(event, payload) else {
            return Ok(());
        };
        self.send(DispatcherMessage::SendToAllExcept {
            excluded_user_id: excluded_user_id.to_string(),
            event,
        })
        .await
    }

    /// Broadcast a `CHANGE` notification for a non-signaling state change.
    pub async fn broadcast_change<T: Serialize>(
        &self,
        entity: ChangeEntity,
        method: ChangeMethod,
        data: &T,
    ) -> Result<(), StreamError> {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(e) => {
                warn!(target: "stream.actor.dispatcher", error = %e, "Dropping unencodable change");
                return Ok(());
            }
        };
        self.send_to_all(
            CHANGE,
            &ChangeNotification {
                entity,
                method,
                data,
            },
        )
        .await
    }

    /// Number of registered sockets.
    pub async fn connection_count(&self) -> Result<usize, StreamError> {
        let (tx, rx) = oneshot::channel();
        self.send(DispatcherMessage::GetConnectionCount { respond_to: tx })
            .await?;
        rx.await
            .map_err(|e| StreamError::Internal(format!("response receive failed: {e}")))
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

fn encode<T: Serialize>(event: &'static str, payload: &T) -> Option<OutboundEvent> {
    match OutboundEvent::new(event, payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(
                target: "stream.actor.dispatcher",
                event,
                error = %e,
                "Dropping event with unencodable payload"
            );
            None
        }
    }
}

#[derive(Debug)]
struct Registration {
    handle: ConnectionHandle,
    user_id: String,
    /// Registration order, used to pick one socket per identity.
    seq: u64,
}

/// The `ConnectionDispatcher` implementation.
pub struct ConnectionDispatcher {
    receiver: mpsc::Receiver<DispatcherMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    disconnects: mpsc::UnboundedSender<String>,
    connections: HashMap<ConnectionId, Registration>,
    next_seq: u64,
}

impl ConnectionDispatcher {
    /// Spawn the dispatcher.
    ///
    /// Returns its handle, the disconnect feed and the task join handle.
    pub fn spawn(
        cancel_token: CancellationToken,
    ) -> (DispatcherHandle, DisconnectFeed, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(DISPATCHER_CHANNEL_BUFFER);
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Dispatcher));

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            mailbox: Arc::clone(&mailbox),
            disconnects: disconnect_tx,
            connections: HashMap::new(),
            next_seq: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = DispatcherHandle {
            sender,
            cancel_token,
            mailbox,
        };

        (
            handle,
            DisconnectFeed {
                receiver: disconnect_rx,
            },
            task_handle,
        )
    }

    #[instrument(skip_all, name = "stream.actor.dispatcher")]
    async fn run(mut self) {
        info!(target: "stream.actor.dispatcher", "ConnectionDispatcher started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "stream.actor.dispatcher",
                        "ConnectionDispatcher received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "stream.actor.dispatcher",
                                "ConnectionDispatcher channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "stream.actor.dispatcher",
            connections = self.connections.len(),
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionDispatcher stopped"
        );
    }

    fn handle_message(&mut self, message: DispatcherMessage) {
        match message {
            DispatcherMessage::Register { handle, user_id } => {
                debug!(
                    target: "stream.actor.dispatcher",
                    connection_id = %handle.id(),
                    user_id = %user_id,
                    "Socket registered"
                );
                let seq = self.next_seq;
                self.next_seq += 1;
                self.connections.insert(
                    handle.id(),
                    Registration {
                        handle,
                        user_id,
                        seq,
                    },
                );
                prom::set_connections_active(self.connections.len());
            }

            DispatcherMessage::Unregister { connection_id } => {
                if let Some(registration) = self.connections.remove(&connection_id) {
                    debug!(
                        target: "stream.actor.dispatcher",
                        connection_id = %connection_id,
                        user_id = %registration.user_id,
                        "Socket unregistered"
                    );
                    prom::set_connections_active(self.connections.len());
                    if self.disconnects.send(registration.user_id).is_err() {
                        debug!(
                            target: "stream.actor.dispatcher",
                            "No disconnect subscriber"
                        );
                    }
                }
            }

            DispatcherMessage::SendTo { handle, event } => {
                if let Some(handle) = handle {
                    if let Some(frame) = self.frame(&event) {
                        self.deliver(&handle, event.event, &frame);
                    }
                }
            }

            DispatcherMessage::SendToUser { user_id, event } => {
                let target = self
                    .connections
                    .values()
                    .filter(|r| r.user_id == user_id)
                    .min_by_key(|r| r.seq)
                    .map(|r| r.handle.clone());

                match (target, self.frame(&event)) {
                    (Some(handle), Some(frame)) => self.deliver(&handle, event.event, &frame),
                    (None, _) => debug!(
                        target: "stream.actor.dispatcher",
                        user_id = %user_id,
                        event = event.event,
                        "No live socket for identity"
                    ),
                    (Some(_), None) => {}
                }
            }

            DispatcherMessage::SendToUsers { user_ids, event } => {
                let user_ids: HashSet<String> = user_ids.into_iter().collect();
                self.fan_out(&event, |r| user_ids.contains(&r.user_id));
            }

            DispatcherMessage::SendToAll { event } => {
                self.fan_out(&event, |_| true);
            }

            DispatcherMessage::SendToAllExcept {
                excluded_user_id,
                event,
            } => {
                self.fan_out(&event, |r| r.user_id != excluded_user_id);
            }

            DispatcherMessage::GetConnectionCount { respond_to } => {
                let _ = respond_to.send(self.connections.len());
            }
        }
    }

    /// Serialize the envelope once for any number of recipients.
    fn frame(&self, event: &OutboundEvent) -> Option<String> {
        let envelope = Envelope {
            event: event.event,
            data: &event.data,
        };
        match serde_json::to_string(&envelope) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(
                    target: "stream.actor.dispatcher",
                    event = event.event,
                    error = %e,
                    "Failed to encode envelope"
                );
                None
            }
        }
    }

    fn fan_out(&self, event: &OutboundEvent, include: impl Fn(&Registration) -> bool) {
        let Some(frame) = self.frame(event) else {
            return;
        };
        for registration in self.connections.values().filter(|r| include(r)) {
            self.deliver(&registration.handle, event.event, &frame);
        }
    }

    fn deliver(&self, handle: &ConnectionHandle, event: &'static str, frame: &str) {
        if let Err(reason) = handle.deliver(frame) {
            self.mailbox.record_drop();
            warn!(
                target: "stream.actor.dispatcher",
                connection_id = %handle.id(),
                event,
                reason,
                "Frame not delivered"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::events::{UserJoined, WEBRTC_USER_JOINED};
    use std::time::Duration;

    async fn next_frame(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("socket queue closed");
        serde_json::from_str(&frame).unwrap()
    }

    /// Round-trip through the mailbox so every earlier message is handled.
    async fn settle(handle: &DispatcherHandle) {
        handle.connection_count().await.unwrap();
    }

    fn joined(uid: &str) -> UserJoined {
        UserJoined {
            uid: uid.to_string(),
        }
    }

    #[tokio::test]
    async fn test_dispatcher_spawn_and_cancel() {
        let (handle, _feed, task) = ConnectionDispatcher::spawn(CancellationToken::new());
        assert!(!handle.is_cancelled());

        handle.cancel();
        assert!(handle.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_register_and_count() {
        let (handle, _feed, _task) = ConnectionDispatcher::spawn(CancellationToken::new());
        let (a, _rx_a) = ConnectionHandle::new(8);
        let (b, _rx_b) = ConnectionHandle::new(8);

        handle.register(a.clone(), "alice".to_string()).await.unwrap();
        handle.register(b, "bob".to_string()).await.unwrap();
        assert_eq!(handle.connection_count().await.unwrap(), 2);

        handle.unregister(a.id()).await.unwrap();
        assert_eq!(handle.connection_count().await.unwrap(), 1);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_unregister_publishes_disconnect() {
        let (handle, mut feed, _task) = ConnectionDispatcher::spawn(CancellationToken::new());
        let (a, _rx) = ConnectionHandle::new(8);

        handle.register(a.clone(), "alice".to_string()).await.unwrap();
        handle.unregister(a.id()).await.unwrap();

        let uid = tokio::time::timeout(Duration::from_secs(1), feed.recv())
            .await
            .unwrap();
        assert_eq!(uid.as_deref(), Some("alice"));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_unregister_publishes_while_other_sockets_remain() {
        let (handle, mut feed, _task) = ConnectionDispatcher::spawn(CancellationToken::new());
        let (a, _rx_a) = ConnectionHandle::new(8);
        let (b, _rx_b) = ConnectionHandle::new(8);

        handle.register(a.clone(), "alice".to_string()).await.unwrap();
        handle.register(b.clone(), "alice".to_string()).await.unwrap();
        handle.unregister(a.id()).await.unwrap();

        let uid = tokio::time::timeout(Duration::from_secs(1), feed.recv())
            .await
            .unwrap();
        assert_eq!(uid.as_deref(), Some("alice"));
        assert_eq!(handle.connection_count().await.unwrap(), 1);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_unregister_unknown_socket_is_silent() {
        let (handle, mut feed, _task) = ConnectionDispatcher::spawn(CancellationToken::new());

        handle.unregister(ConnectionId::new()).await.unwrap();
        settle(&handle).await;

        assert!(feed.receiver.try_recv().is_err());
        handle.cancel();
    }

    #[tokio::test]
    async fn test_send_to_writes_envelope() {
        let (handle, _feed, _task) = ConnectionDispatcher::spawn(CancellationToken::new());
        let (a, mut rx) = ConnectionHandle::new(8);

        handle
            .send_to(Some(a), WEBRTC_USER_JOINED, &joined("bob"))
            .await
            .unwrap();

        let frame = next_frame(&mut rx).await;
        assert_eq!(
            frame,
            serde_json::json!({"event": "WEBRTC_USER_JOINED", "data": {"uid": "bob"}})
        );
        handle.cancel();
    }

    #[tokio::test]
    async fn test_send_to_none_is_noop() {
        let (handle, _feed, _task) = ConnectionDispatcher::spawn(CancellationToken::new());
        handle
            .send_to(None, WEBRTC_USER_JOINED, &joined("bob"))
            .await
            .unwrap();
        settle(&handle).await;
        assert_eq!(handle.mailbox().messages_dropped(), 0);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_send_to_user_delivers_once_to_earliest_socket() {
        let (handle, _feed, _task) = ConnectionDispatcher::spawn(CancellationToken::new());
        let (first, mut rx_first) = ConnectionHandle::new(8);
        let (second, mut rx_second) = ConnectionHandle::new(8);

        handle.register(first, "alice".to_string()).await.unwrap();
        handle.register(second, "alice".to_string()).await.unwrap();
        handle
            .send_to_user("alice", WEBRTC_USER_JOINED, &joined("bob"))
            .await
            .unwrap();
        settle(&handle).await;

        assert!(rx_first.try_recv().is_ok());
        assert!(rx_second.try_recv().is_err());
        handle.cancel();
    }

    #[tokio::test]
    async fn test_send_to_users_targets_set() {
        let (handle, _feed, _task) = ConnectionDispatcher::spawn(CancellationToken::new());
        let (a, mut rx_a) = ConnectionHandle::new(8);
        let (b, mut rx_b) = ConnectionHandle::new(8);
        let (c, mut rx_c) = ConnectionHandle::new(8);

        handle.register(a, "alice".to_string()).await.unwrap();
        handle.register(b, "bob".to_string()).await.unwrap();
        handle.register(c, "carol".to_string()).await.unwrap();
        handle
            .send_to_users(
                vec!["alice".to_string(), "carol".to_string()],
                WEBRTC_USER_JOINED,
                &joined("dave"),
            )
            .await
            .unwrap();
        settle(&handle).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
        assert!(rx_c.try_recv().is_ok());
        handle.cancel();
    }

    #[tokio::test]
    async fn test_send_to_all_except() {
        let (handle, _feed, _task) = ConnectionDispatcher::spawn(CancellationToken::new());
        let (a, mut rx_a) = ConnectionHandle::new(8);
        let (b, mut rx_b) = ConnectionHandle::new(8);

        handle.register(a, "alice".to_string()).await.unwrap();
        handle.register(b, "bob".to_string()).await.unwrap();
        handle
            .send_to_all_except("alice", WEBRTC_USER_JOINED, &joined("alice"))
            .await
            .unwrap();
        settle(&handle).await;

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
        handle.cancel();
    }

    #[tokio::test]
    async fn test_full_socket_does_not_block_others() {
        let (handle, _feed, _task) = ConnectionDispatcher::spawn(CancellationToken::new());
        let (slow, _rx_slow) = ConnectionHandle::new(1);
        let (fast, mut rx_fast) = ConnectionHandle::new(8);

        handle.register(slow, "slow".to_string()).await.unwrap();
        handle.register(fast, "fast".to_string()).await.unwrap();
        for i in 0..3 {
            handle
                .send_to_all(WEBRTC_USER_JOINED, &joined(&format!("u{i}")))
                .await
                .unwrap();
        }
        settle(&handle).await;

        for _ in 0..3 {
            assert!(rx_fast.try_recv().is_ok());
        }
        assert_eq!(handle.mailbox().messages_dropped(), 2);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_closed_socket_does_not_block_others() {
        let (handle, _feed, _task) = ConnectionDispatcher::spawn(CancellationToken::new());
        let (gone, rx_gone) = ConnectionHandle::new(8);
        let (live, mut rx_live) = ConnectionHandle::new(8);
        drop(rx_gone);

        handle.register(gone, "gone".to_string()).await.unwrap();
        handle.register(live, "live".to_string()).await.unwrap();
        handle
            .send_to_all(WEBRTC_USER_JOINED, &joined("x"))
            .await
            .unwrap();

        let frame = next_frame(&mut rx_live).await;
        assert_eq!(frame["data"]["uid"], "x");
        handle.cancel();
    }

    #[tokio::test]
    async fn test_broadcast_change() {
        let (handle, _feed, _task) = ConnectionDispatcher::spawn(CancellationToken::new());
        let (a, mut rx) = ConnectionHandle::new(8);
        handle.register(a, "alice".to_string()).await.unwrap();

        handle
            .broadcast_change(
                ChangeEntity::Stream,
                ChangeMethod::Delete,
                &serde_json::json!({"name": "porch"}),
            )
            .await
            .unwrap();

        let frame = next_frame(&mut rx).await;
        assert_eq!(
            frame,
            serde_json::json!({
                "event": "CHANGE",
                "data": {"entity": "STREAM", "method": "DELETE", "data": {"name": "porch"}}
            })
        );
        handle.cancel();
    }

    #[tokio::test]
    async fn test_send_after_shutdown_fails() {
        let (handle, _feed, task) = ConnectionDispatcher::spawn(CancellationToken::new());
        handle.cancel();
        task.await.unwrap();

        let result = handle
            .send_to_all(WEBRTC_USER_JOINED, &joined("x"))
            .await;
        assert!(matches!(result, Err(StreamError::Internal(_))));
    }
}
