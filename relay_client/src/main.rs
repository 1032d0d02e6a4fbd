//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p relay_client -- [--url ws://127.0.0.1:3000/ws] [--lat 0] [--lon 0]
//!                                [--step 0.001] [--interval-ms 1000] [--seed 1]
//!
//! The client connects to the relay, publishes a position every interval,
//! and logs peers as they move and leave.

use std::env;
use std::time::Duration;

use anyhow::Context;
use relay_client::{client::ClientState, source::LocationSource, RelayClient};
use relay_shared::net::ServerEvent;
use tracing::info;

struct Args {
    url: String,
    lat: f64,
    lon: f64,
    step: f64,
    interval: Duration,
    seed: u64,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut out = Args {
        url: "ws://127.0.0.1:3000/ws".to_string(),
        lat: 0.0,
        lon: 0.0,
        step: 0.001,
        interval: Duration::from_millis(1000),
        seed: 1,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--url", Some(v)) => out.url = v.clone(),
            ("--lat", Some(v)) => out.lat = v.parse().with_context(|| format!("invalid --lat '{v}'"))?,
            ("--lon", Some(v)) => out.lon = v.parse().with_context(|| format!("invalid --lon '{v}'"))?,
            ("--step", Some(v)) => out.step = v.parse().with_context(|| format!("invalid --step '{v}'"))?,
            ("--interval-ms", Some(v)) => {
                out.interval = Duration::from_millis(
                    v.parse().with_context(|| format!("invalid --interval-ms '{v}'"))?,
                )
            }
            ("--seed", Some(v)) => out.seed = v.parse().with_context(|| format!("invalid --seed '{v}'"))?,
            _ => {
                i += 1;
                continue;
            }
        }
        i += 2;
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args()?;
    info!(url = %args.url, lat = args.lat, lon = args.lon, "Starting client");

    let mut client = RelayClient::connect(&args.url).await.context("connect")?;
    let mut source = LocationSource::new(args.lat, args.lon, args.step, args.seed);
    let mut ticker = tokio::time::interval(args.interval.max(Duration::from_millis(10)));

    while client.state == ClientState::Connected {
        tokio::select! {
            _ = ticker.tick() => {
                client.send_location(source.next_fix()).await?;
            }
            event = client.recv_event() => {
                match event? {
                    Some(ServerEvent::ReceiveLocation(env)) => info!(
                        peer = %env.id,
                        lat = env.location.latitude,
                        lon = env.location.longitude,
                        peers = client.peers.len(),
                        "Peer position"
                    ),
                    Some(ServerEvent::UserDisconnect(id)) => {
                        info!(peer = %id, peers = client.peers.len(), "Peer left")
                    }
                    Some(ServerEvent::Welcome { .. }) => {}
                    None => break,
                }
            }
        }
    }

    info!(sent = client.sent(), "Disconnected from relay");
    Ok(())
}
