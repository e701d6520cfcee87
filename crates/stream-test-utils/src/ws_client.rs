//! Signaling socket client for E2E tests.
//!
//! Wraps a `tokio-tungstenite` connection and speaks the `{event, data}`
//! envelope used on `/api/ws`.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Header the test server reads the caller identity from.
pub const TEST_IDENTITY_HEADER: &str = "x-user-id";

/// How long [`WsClient::next_event`] waits before failing.
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected signaling participant.
pub struct WsClient {
    user_id: String,
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    /// Open `ws_url` as `user_id`.
    pub async fn connect(ws_url: &str, user_id: &str) -> Result<Self, anyhow::Error> {
        let mut request = ws_url.into_client_request()?;
        request
            .headers_mut()
            .insert(TEST_IDENTITY_HEADER, HeaderValue::from_str(user_id)?);

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed for {}: {}", user_id, e))?;

        Ok(Self {
            user_id: user_id.to_string(),
            socket,
        })
    }

    /// Identity this client connected as.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Send one `{event, data}` frame.
    pub async fn send_event(&mut self, event: &str, data: Value) -> Result<(), anyhow::Error> {
        let frame = json!({ "event": event, "data": data });
        self.send_raw(&frame.to_string()).await
    }

    /// Send an arbitrary text frame.
    pub async fn send_raw(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.socket.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Next text frame, parsed as JSON. Control frames are skipped.
    pub async fn next_event(&mut self) -> Result<Value, anyhow::Error> {
        tokio::time::timeout(EVENT_TIMEOUT, self.next_text())
            .await
            .map_err(|_| anyhow::anyhow!("{} timed out waiting for an event", self.user_id))?
    }

    /// Next frame whose `event` is `event`, skipping any others.
    pub async fn next_event_named(&mut self, event: &str) -> Result<Value, anyhow::Error> {
        loop {
            let frame = self.next_event().await?;
            if frame["event"] == event {
                return Ok(frame);
            }
        }
    }

    /// Fail if any text frame arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) -> Result<(), anyhow::Error> {
        match tokio::time::timeout(window, self.next_text()).await {
            Err(_) => Ok(()),
            Ok(Ok(frame)) => Err(anyhow::anyhow!(
                "{} expected silence, got {}",
                self.user_id,
                frame
            )),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Close the socket and wait for the server to acknowledge.
    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        self.socket.close(None).await?;
        while let Some(message) = self.socket.next().await {
            if message.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn next_text(&mut self) -> Result<Value, anyhow::Error> {
        while let Some(message) = self.socket.next().await {
            match message? {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(_) => break,
                _ => continue,
            }
        }
        Err(anyhow::anyhow!("{} socket closed", self.user_id))
    }
}
