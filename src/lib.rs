//! Camera stream relay
//!
//! Supervises one external transcoder per camera id and relays its output to
//! WebSocket clients.
//!
//! # Example
//!
//! ```no_run
//! use cam_relay::{RegistryConfig, RelayServer, ServerConfig};
//!
//! # async fn run() -> cam_relay::Result<()> {
//! let server = RelayServer::with_registry_config(
//!     ServerConfig::from_env()?,
//!     RegistryConfig::from_env()?,
//! );
//! server.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await
//! # }
//! ```

mod env;

pub mod error;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod stats;
pub mod transcoder;

pub use error::{Error, Result};
pub use protocol::{ControlMessage, FrameMode, ServerMessage};
pub use registry::{CameraStreamRequest, RegistryConfig, RegistryError, StreamRegistry};
pub use relay::{Relay, RelayEnd};
pub use server::{RelayServer, ServerConfig};
pub use transcoder::{TranscoderCommand, TranscoderProcess};
