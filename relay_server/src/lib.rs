//! `relay_server`
//!
//! Server-side systems:
//! - Connection hub: session registry and location fan-out
//! - WebSocket transport over axum
//! - Operator console
//!
//! Networking model:
//! - One WebSocket per client, JSON text frames both ways
//! - Bounded per-session outbound queues; slow or dead sessions are dropped

pub mod console;
pub mod hub;
pub mod server;

pub use hub::Hub;
pub use server::RelayServer;
