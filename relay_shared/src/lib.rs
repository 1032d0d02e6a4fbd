//! `relay_shared`
//!
//! Shared libraries used by both the relay server and its clients.
//!
//! - `net`: session ids, location payloads, and the JSON frame protocol.
//! - `config`: relay configuration.

pub mod config;
pub mod net;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::net::*;
}
