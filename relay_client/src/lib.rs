//! `relay_client`
//!
//! Client-side systems:
//! - Connection management (WebSocket to the relay)
//! - Synthetic position source
//! - Local peer table built from relay events

pub mod client;
pub mod peers;
pub mod source;

pub use client::RelayClient;
