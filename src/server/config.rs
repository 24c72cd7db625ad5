//! Server configuration

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::env;
use crate::error::Result;
use crate::protocol::FrameMode;
use crate::session::SessionConfig;

/// Default listening port
pub const DEFAULT_PORT: u16 = 3000;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Frames queued per connection before relays start waiting
    pub outbound_capacity: usize,

    /// How long a relay waits on a full queue before dropping the stream
    pub write_timeout: Duration,

    /// Binary framing for relayed output
    pub frame_mode: FrameMode,

    /// Stop a session's streams when it disconnects
    pub stop_streams_on_disconnect: bool,

    /// HTML page served on `GET /` without an upgrade
    pub index_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            outbound_capacity: 256,
            write_timeout: Duration::from_secs(5),
            frame_mode: FrameMode::Raw,
            stop_streams_on_disconnect: true,
            index_file: None,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Load from the process environment
    ///
    /// `HOST`, `PORT`, `MAX_CONNECTIONS`, `OUTBOUND_CAPACITY`,
    /// `WRITE_TIMEOUT_MS`, `FRAME_MODE`, `STOP_ON_DISCONNECT`, `INDEX_FILE`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using a custom variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = env::parse::<IpAddr, _>(&lookup, "HOST")? {
            config.bind_addr.set_ip(host);
        }
        if let Some(port) = env::parse::<u16, _>(&lookup, "PORT")? {
            config.bind_addr.set_port(port);
        }
        if let Some(max) = env::parse(&lookup, "MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(capacity) = env::parse(&lookup, "OUTBOUND_CAPACITY")? {
            config = config.outbound_capacity(capacity);
        }
        if let Some(ms) = env::parse::<u64, _>(&lookup, "WRITE_TIMEOUT_MS")? {
            config.write_timeout = Duration::from_millis(ms);
        }
        if let Some(mode) = env::parse(&lookup, "FRAME_MODE")? {
            config.frame_mode = mode;
        }
        if let Some(stop) = env::flag(&lookup, "STOP_ON_DISCONNECT")? {
            config.stop_streams_on_disconnect = stop;
        }
        if let Some(path) = env::parse::<PathBuf, _>(&lookup, "INDEX_FILE")? {
            config.index_file = Some(path);
        }

        Ok(config)
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-connection queue size (at least 1)
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    /// Set the write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the binary framing
    pub fn frame_mode(mut self, mode: FrameMode) -> Self {
        self.frame_mode = mode;
        self
    }

    /// Keep streams running after their session disconnects
    pub fn keep_streams_on_disconnect(mut self) -> Self {
        self.stop_streams_on_disconnect = false;
        self
    }

    /// Serve an HTML page on `GET /`
    pub fn index_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_file = Some(path.into());
        self
    }

    /// Per-session settings derived from this config
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            frame_mode: self.frame_mode,
            write_timeout: self.write_timeout,
            stop_streams_on_disconnect: self.stop_streams_on_disconnect,
        }
    }
}
