//! Operator console.
//!
//! Commands:
//!   status       - list connected sessions
//!   kick <id>    - disconnect a session
//!   help         - list commands
//!
//! `quit` is handled by the binary, which owns shutdown.

use std::sync::Arc;

use chrono::Utc;
use relay_shared::net::SessionId;
use tracing::info;

use crate::hub::Hub;

pub struct Console {
    hub: Arc<Hub>,
}

impl Console {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Executes one console line and returns the lines to print.
    pub async fn exec(&self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&cmd) = tokens.first() else {
            return Vec::new();
        };

        match cmd {
            "status" => self.status().await,
            "kick" => match tokens.get(1) {
                Some(raw) => self.kick(raw).await,
                None => vec!["Usage: kick <session-id>".to_string()],
            },
            "help" => vec![
                "status            - list connected sessions".to_string(),
                "kick <session-id> - disconnect a session".to_string(),
                "quit              - stop the relay".to_string(),
            ],
            other => vec![format!("Unknown command: {other}")],
        }
    }

    async fn status(&self) -> Vec<String> {
        let sessions = self.hub.sessions().await;
        let now = Utc::now();
        let mut out = vec![format!("Sessions: {}", sessions.len())];
        for s in sessions {
            out.push(format!(
                "  {} connected {} ({}s ago)",
                s.id,
                s.connected_at.format("%Y-%m-%d %H:%M:%S UTC"),
                (now - s.connected_at).num_seconds()
            ));
        }
        out
    }

    async fn kick(&self, raw: &str) -> Vec<String> {
        let id: SessionId = match raw.parse() {
            Ok(id) => id,
            Err(e) => return vec![format!("Invalid session id '{raw}': {e}")],
        };
        if self.hub.disconnect(id).await {
            info!(session_id = %id, "Session kicked from console");
            vec![format!("Kicked {id}")]
        } else {
            vec![format!("No such session: {id}")]
        }
    }
}
