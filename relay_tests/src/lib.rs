//! Helpers for the relay integration tests.

use std::{sync::Arc, time::Duration};

use relay_client::RelayClient;
use relay_server::{server::bind_ephemeral, Hub};
use relay_shared::{config::RelayConfig, net::ServerEvent};
use tokio::{sync::oneshot, task::JoinHandle};

/// Window within which an expected event must arrive.
pub const DELIVERY_WINDOW: Duration = Duration::from_secs(5);

/// How long to wait before concluding that no further event is coming.
pub const QUIET_WINDOW: Duration = Duration::from_millis(200);

/// A relay running on an ephemeral port. Stops when dropped.
pub struct TestRelay {
    pub url: String,
    pub hub: Arc<Hub>,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestRelay {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(RelayConfig::default()).await
    }

    pub async fn start_with(cfg: RelayConfig) -> anyhow::Result<Self> {
        init_tracing();
        let (server, cfg) = bind_ephemeral(cfg).await?;
        let url = format!("ws://{}{}", cfg.listen_addr, cfg.ws_path);
        let hub = server.hub();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));
        Ok(Self {
            url,
            hub,
            stop: Some(stop),
            handle,
        })
    }

    pub async fn connect(&self) -> anyhow::Result<RelayClient> {
        RelayClient::connect(&self.url).await
    }

    /// Stops accepting connections and waits for the server task.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.handle).await?
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Waits for the next event, failing if none arrives within `DELIVERY_WINDOW`.
pub async fn expect_event(client: &mut RelayClient) -> anyhow::Result<ServerEvent> {
    match client.recv_timeout(DELIVERY_WINDOW).await? {
        Some(event) => Ok(event),
        None => anyhow::bail!("session {} received nothing", client.session_id),
    }
}

/// Asserts that nothing arrives within `QUIET_WINDOW`.
pub async fn expect_quiet(client: &mut RelayClient) -> anyhow::Result<()> {
    if let Some(event) = client.recv_timeout(QUIET_WINDOW).await? {
        anyhow::bail!("session {} got unexpected {event:?}", client.session_id);
    }
    Ok(())
}
