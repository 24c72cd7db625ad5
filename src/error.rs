//! Crate-level error type
//!
//! Covers server startup and configuration. Per-request failures are
//! [`RegistryError`](crate::registry::RegistryError) and
//! [`ProtocolError`](crate::protocol::ProtocolError), which are reported to
//! the client instead of propagated.

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure (socket bind, serve)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),
}
