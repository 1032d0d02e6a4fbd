//! Configuration system.
//!
//! Loads relay configuration from JSON strings/files. Binaries layer CLI
//! overrides on top.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Root configuration shared by server and client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Server listen address, e.g. `0.0.0.0:3000`.
    pub listen_addr: String,
    /// HTTP path the WebSocket upgrade is served on.
    pub ws_path: String,
    /// Per-session outbound queue depth, not counting the `welcome` frame.
    /// A session whose queue fills up is disconnected.
    pub outbound_capacity: usize,
    /// Upper bound on a single socket write.
    pub write_timeout_ms: u64,
    /// Interval between server pings.
    pub ping_interval_secs: u64,
    /// Grace period after a missed ping before the connection is dropped.
    pub ping_timeout_secs: u64,
    /// Largest accepted inbound frame.
    pub max_frame_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            ws_path: "/ws".to_string(),
            outbound_capacity: 64,
            write_timeout_ms: 5_000,
            ping_interval_secs: 25,
            ping_timeout_secs: 20,
            max_frame_bytes: 64 * 1024,
        }
    }
}

impl RelayConfig {
    /// Parses config from JSON. Missing keys take their defaults.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = Self::from_json_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        debug!(path = %path.display(), ?cfg, "Loaded config");
        Ok(cfg)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Clamped to at least one second.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    /// How long a connection may stay silent before it counts as dead.
    pub fn idle_timeout(&self) -> Duration {
        self.ping_interval() + Duration::from_secs(self.ping_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = RelayConfig::from_json_str(r#"{"listen_addr":"127.0.0.1:4000","outbound_capacity":8}"#)
            .unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:4000");
        assert_eq!(cfg.outbound_capacity, 8);
        assert_eq!(cfg.ws_path, "/ws");
        assert_eq!(cfg.idle_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = RelayConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(format!("{err:#}").contains("read config"));
    }
}
