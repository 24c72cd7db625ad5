//! Stream registry
//!
//! The registry owns the mapping from camera id to running transcoder and
//! guarantees at most one live process per id, across all connections.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<StreamRegistry>
//!                     ┌─────────────────────────┐
//!                     │ streams: HashMap<id,    │
//!                     │   StreamEntry {         │
//!                     │     generation,         │
//!                     │     shutdown: watch::Tx │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │ start()
//!                 ┌───────────────┴───────────────┐
//!                 ▼                               ▼
//!          [Supervisor task]                [StreamHandle]
//!          owns Child, kills on             output + shutdown
//!          shutdown, reports exit           watched by the relay
//!                 │                               │
//!                 └─► on_process_exit()           └──► relay ──► WebSocket
//! ```
//!
//! # Process identity
//!
//! Each spawned process gets a `generation`. Exit reports and relay-initiated
//! stops carry it, so a late event from a replaced process can never remove
//! its successor.

pub mod config;
pub mod entry;
pub mod error;
pub mod request;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{StreamEntry, StreamHandle, StreamInfo};
pub use error::RegistryError;
pub use request::CameraStreamRequest;
pub use store::StreamRegistry;
