//! Client sessions
//!
//! A session is one WebSocket connection. It turns control messages into
//! registry calls and attaches a relay to every stream it starts.

pub mod connection;
pub mod state;

pub use connection::{ClientSession, SessionConfig};
pub use state::{SessionPhase, SessionState};
