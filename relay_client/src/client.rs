//! Client implementation.
//!
//! The client maintains:
//! - One WebSocket to the relay
//! - Its own session id, learned from the `welcome` frame
//! - A `PeerMap` of every other session's last reported position

use std::time::Duration;

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use relay_shared::net::{
    decode_frame, encode_frame, ClientEvent, LocationUpdate, ServerEvent, SessionId,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::peers::PeerMap;

/// How long `connect` waits for the `welcome` frame.
const WELCOME_TIMEOUT: Duration = Duration::from_secs(5);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    /// The relay closed the connection, or the client disconnected.
    Disconnected,
}

/// Relay client.
pub struct RelayClient {
    pub session_id: SessionId,
    pub state: ClientState,
    pub peers: PeerMap,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    sent: u64,
}

impl RelayClient {
    /// Connects to `url` (e.g. `ws://127.0.0.1:3000/ws`) and waits for the
    /// relay to assign a session id.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        info!(%url, "Connecting to relay");
        let (mut ws, _resp) = connect_async(url)
            .await
            .with_context(|| format!("websocket connect {url}"))?;

        let session_id = tokio::time::timeout(WELCOME_TIMEOUT, read_welcome(&mut ws))
            .await
            .context("timed out waiting for welcome")??;

        info!(session_id = %session_id, "Connected to relay");
        Ok(Self {
            session_id,
            state: ClientState::Connected,
            peers: PeerMap::default(),
            ws,
            sent: 0,
        })
    }

    /// Publishes one position report.
    pub async fn send_location(&mut self, update: LocationUpdate) -> anyhow::Result<()> {
        self.send(&ClientEvent::SendLocation(update)).await?;
        self.sent += 1;
        Ok(())
    }

    /// Number of location updates sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Sends a raw text frame, bypassing encoding. Useful for exercising the
    /// relay with malformed input.
    pub async fn send_raw(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws
            .send(Message::text(text))
            .await
            .context("websocket send")
    }

    async fn send(&mut self, event: &ClientEvent) -> anyhow::Result<()> {
        let text = encode_frame(event)?;
        self.ws
            .send(Message::text(text))
            .await
            .context("websocket send")
    }

    /// Waits for the next relay event and applies it to `peers`.
    ///
    /// Returns `None` once the connection is closed.
    pub async fn recv_event(&mut self) -> anyhow::Result<Option<ServerEvent>> {
        while let Some(msg) = self.ws.next().await {
            let msg = msg.context("websocket read")?;
            match msg {
                Message::Text(text) => {
                    let event: ServerEvent = match decode_frame(text.as_str()) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %format!("{e:#}"), "Ignoring undecodable frame");
                            continue;
                        }
                    };
                    self.peers.apply(&event);
                    return Ok(Some(event));
                }
                Message::Close(frame) => {
                    debug!(?frame, "Relay closed connection");
                    break;
                }
                // Pongs are queued by tungstenite and flushed on the next read/write.
                Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
            }
        }
        self.state = ClientState::Disconnected;
        Ok(None)
    }

    /// Like `recv_event`, but gives up after `timeout`.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<Option<ServerEvent>> {
        match tokio::time::timeout(timeout, self.recv_event()).await {
            Ok(res) => res,
            Err(_) => Ok(None),
        }
    }

    /// Sends an explicit `disconnect` and closes the socket.
    pub async fn disconnect(mut self) -> anyhow::Result<()> {
        self.send(&ClientEvent::Disconnect).await?;
        self.state = ClientState::Disconnected;
        // The relay may already have torn the connection down.
        let _ = self.ws.close(None).await;
        info!(session_id = %self.session_id, "Disconnected from relay");
        Ok(())
    }

    /// Closes the socket with a close frame, without an explicit `disconnect`.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.state = ClientState::Disconnected;
        self.ws.close(None).await.context("websocket close")
    }
}

async fn read_welcome(ws: &mut WebSocketStream<MaybeTlsStream<TcpStream>>) -> anyhow::Result<SessionId> {
    while let Some(msg) = ws.next().await {
        match msg.context("websocket read")? {
            Message::Text(text) => match decode_frame::<ServerEvent>(text.as_str())? {
                ServerEvent::Welcome { id } => return Ok(id),
                other => anyhow::bail!("expected welcome, got {other:?}"),
            },
            Message::Close(frame) => anyhow::bail!("relay closed during handshake: {frame:?}"),
            _ => {}
        }
    }
    anyhow::bail!("relay closed during handshake")
}
