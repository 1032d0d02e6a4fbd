//! Server implementation.
//!
//! Serves the hub over a WebSocket upgrade at `cfg.ws_path`. Each connection:
//! - registers with the hub as soon as the upgrade completes
//! - runs a writer task draining the session's outbound queue, with every
//!   socket write bounded by `cfg.write_timeout`
//! - pings the client every `cfg.ping_interval`
//! - reads client frames until close, error, explicit `disconnect`, or
//!   `cfg.idle_timeout` of silence
//!
//! Whichever side ends first, the session is removed with a single
//! `Hub::disconnect` call.

use std::{fmt, future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::Bytes;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use relay_shared::{
    config::RelayConfig,
    net::{decode_frame, ClientEvent, SessionId},
};
use tokio::{
    net::TcpListener,
    sync::mpsc,
    time::{self, Instant},
};
use tracing::{debug, info, warn};

use crate::hub::{Frame, Hub};

/// Why a connection ended.
#[derive(Debug)]
enum Closed {
    /// Client sent a close frame or the stream ended.
    ClientClosed,
    /// Client sent a `disconnect` event.
    ClientRequested,
    ReadFailed(String),
    /// No frame (including pongs) within the idle timeout.
    IdleTimeout,
    /// The hub dropped the session (eviction or operator kick).
    DroppedByHub,
    WriteFailed(String),
    WriteTimedOut,
}

impl fmt::Display for Closed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Closed::ClientClosed => f.write_str("client closed"),
            Closed::ClientRequested => f.write_str("client requested disconnect"),
            Closed::ReadFailed(e) => write!(f, "read failed: {e}"),
            Closed::IdleTimeout => f.write_str("idle timeout"),
            Closed::DroppedByHub => f.write_str("dropped by hub"),
            Closed::WriteFailed(e) => write!(f, "write failed: {e}"),
            Closed::WriteTimedOut => f.write_str("write timed out"),
        }
    }
}

/// Per-connection timing, copied out of the config.
#[derive(Debug, Clone, Copy)]
struct Timing {
    write_timeout: Duration,
    ping_interval: Duration,
    idle_timeout: Duration,
}

impl Timing {
    fn from_config(cfg: &RelayConfig) -> Self {
        Self {
            write_timeout: cfg.write_timeout(),
            ping_interval: cfg.ping_interval(),
            idle_timeout: cfg.idle_timeout(),
        }
    }
}

#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
    timing: Timing,
    max_frame_bytes: usize,
}

/// Location relay server.
pub struct RelayServer {
    pub cfg: RelayConfig,
    hub: Arc<Hub>,
    listener: TcpListener,
}

impl RelayServer {
    /// Binds the listener described by `cfg`.
    pub async fn bind(cfg: RelayConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&cfg.listen_addr)
            .await
            .with_context(|| format!("bind {}", cfg.listen_addr))?;
        let hub = Arc::new(Hub::new(cfg.outbound_capacity));
        Ok(Self { cfg, hub, listener })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr().context("local_addr")
    }

    /// Shared handle to the hub, for the console and tests.
    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    /// Builds the HTTP router: a single WebSocket route.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            timing: Timing::from_config(&self.cfg),
            max_frame_bytes: self.cfg.max_frame_bytes,
        };
        Router::new()
            .route(&self.cfg.ws_path, get(ws_upgrade))
            .with_state(state)
    }

    /// Serves until the process exits.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let local = self.local_addr()?;
        info!(%local, path = %self.cfg.ws_path, "Relay listening");
        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("serve")?;
        info!("Relay stopped");
        Ok(())
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let max = state.max_frame_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| serve_session(socket, state))
}

async fn serve_session(socket: WebSocket, state: AppState) {
    let membership = state.hub.connect().await;
    let id = membership.id;
    let timing = state.timing;

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, membership.outbound, timing));

    let (reason, writer_done) = tokio::select! {
        reason = read_loop(stream, &state.hub, id, timing.idle_timeout) => (reason, false),
        res = &mut writer => {
            let reason = res.unwrap_or_else(|e| Closed::WriteFailed(e.to_string()));
            (reason, true)
        }
    };

    state.hub.disconnect(id).await;
    info!(session_id = %id, %reason, "Connection closed");

    if !writer_done {
        // The queue is closed now; give the writer a chance to send its close frame.
        if time::timeout(timing.write_timeout, &mut writer).await.is_err() {
            writer.abort();
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    hub: &Hub,
    id: SessionId,
    idle_timeout: Duration,
) -> Closed {
    loop {
        let msg = match time::timeout(idle_timeout, stream.next()).await {
            Err(_) => return Closed::IdleTimeout,
            Ok(None) => return Closed::ClientClosed,
            Ok(Some(Err(e))) => return Closed::ReadFailed(e.to_string()),
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => match decode_frame::<ClientEvent>(text.as_str()) {
                Ok(ClientEvent::SendLocation(update)) => {
                    hub.publish(id, update).await;
                }
                Ok(ClientEvent::Disconnect) => return Closed::ClientRequested,
                Err(e) => {
                    debug!(session_id = %id, error = %format!("{e:#}"), "Dropping malformed frame");
                }
            },
            Message::Close(_) => return Closed::ClientClosed,
            // Pings are answered by the protocol layer; both only reset the idle timer.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => {
                debug!(session_id = %id, "Ignoring binary frame");
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Frame>,
    timing: Timing,
) -> Closed {
    let mut ping = time::interval_at(Instant::now() + timing.ping_interval, timing.ping_interval);

    loop {
        let msg = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => Message::Text(Utf8Bytes::from(&*frame)),
                None => {
                    let _ = time::timeout(timing.write_timeout, sink.send(Message::Close(None))).await;
                    return Closed::DroppedByHub;
                }
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        match time::timeout(timing.write_timeout, sink.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Closed::WriteFailed(e.to_string()),
            Err(_) => {
                warn!(timeout = ?timing.write_timeout, "Socket write timed out");
                return Closed::WriteTimedOut;
            }
        }
    }
}

/// Helper for tests: bind `cfg` to an ephemeral localhost port.
///
/// Returns the server and a copy of the config whose `listen_addr` is the
/// bound address.
pub async fn bind_ephemeral(mut cfg: RelayConfig) -> anyhow::Result<(RelayServer, RelayConfig)> {
    cfg.listen_addr = "127.0.0.1:0".to_string();
    let mut server = RelayServer::bind(cfg).await?;
    server.cfg.listen_addr = server.local_addr()?.to_string();
    let cfg = server.cfg.clone();
    Ok((server, cfg))
}
