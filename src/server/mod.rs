//! WebSocket server
//!
//! Accepts connections on `/` and `/ws`, hands each socket to a
//! [`ClientSession`](crate::session::ClientSession), and stops all
//! transcoders when it shuts down.

pub mod config;
pub mod listener;

pub use config::{ServerConfig, DEFAULT_PORT};
pub use listener::RelayServer;
