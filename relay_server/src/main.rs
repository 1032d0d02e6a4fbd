//! Standalone relay server binary.
//!
//! Usage:
//!   cargo run -p relay_server -- [--config relay.json] [--addr 0.0.0.0:3000] [--path /ws] [--queue 64]
//!
//! Clients connect with a WebSocket to `ws://<addr><path>`, publish
//! `send-location` frames, and receive every other client's updates.
//!
//! Console commands:
//!   status          - Show connected sessions
//!   kick <id>       - Disconnect a session
//!   quit            - Shutdown server

use std::env;
use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::Context;
use relay_server::{console::Console, RelayServer};
use relay_shared::config::RelayConfig;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

fn parse_args() -> anyhow::Result<RelayConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => RelayConfig::load(Path::new(&args[i + 1]))?,
        _ => RelayConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.listen_addr = args[i + 1].clone();
                i += 2;
            }
            "--path" if i + 1 < args.len() => {
                cfg.ws_path = args[i + 1].clone();
                i += 2;
            }
            "--queue" if i + 1 < args.len() => {
                cfg.outbound_capacity = args[i + 1]
                    .parse()
                    .with_context(|| format!("invalid --queue '{}'", args[i + 1]))?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.listen_addr, path = %cfg.ws_path, queue = cfg.outbound_capacity, "Starting relay");

    let server = RelayServer::bind(cfg).await.context("create server")?;
    let console = Console::new(server.hub());

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);
    let (quit_tx, quit_rx) = oneshot::channel::<()>();

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(line) = console_rx.recv().await {
            if matches!(line.as_str(), "quit" | "exit") {
                info!("Server shutting down");
                let _ = quit_tx.send(());
                return;
            }
            for out in console.exec(&line).await {
                println!("{out}");
            }
        }
    });

    println!("Relay ready. Type 'status' for sessions, 'kick <id>' to drop one, 'quit' to exit.");
    println!();

    server
        .run_until(async {
            // A closed stdin drops the sender; keep serving in that case.
            if quit_rx.await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
}
