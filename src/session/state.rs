//! Session state
//!
//! Tracks one connection from open to close, plus the streams it started.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Connection open, accepting control messages
    Open,
    /// Connection closed
    Closed,
}

/// Per-connection state
#[derive(Debug)]
pub struct SessionState {
    /// Unique session ID
    pub id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: SessionPhase,

    /// Connection start time
    pub connected_at: Instant,

    /// Streams started by this session, with the generation it started
    streams: HashMap<String, u64>,
}

impl SessionState {
    /// Create a new session state
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: SessionPhase::Open,
            connected_at: Instant::now(),
            streams: HashMap::new(),
        }
    }

    /// Remember that this session started `generation` of `stream_id`
    pub fn track_stream(&mut self, stream_id: &str, generation: u64) {
        self.streams.insert(stream_id.to_string(), generation);
    }

    /// Forget a stream
    pub fn untrack_stream(&mut self, stream_id: &str) -> Option<u64> {
        self.streams.remove(stream_id)
    }

    /// Generation this session started for `stream_id`
    pub fn stream_generation(&self, stream_id: &str) -> Option<u64> {
        self.streams.get(stream_id).copied()
    }

    /// Number of tracked streams
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Take every tracked stream, leaving none
    pub fn drain_streams(&mut self) -> Vec<(String, u64)> {
        self.streams.drain().collect()
    }

    /// Get session duration
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Check if session is open
    pub fn is_open(&self) -> bool {
        self.phase == SessionPhase::Open
    }

    /// Mark the session closed
    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000)
    }

    #[test]
    fn test_session_lifecycle() {
        let mut state = SessionState::new(1, addr());
        assert_eq!(state.phase, SessionPhase::Open);
        assert!(state.is_open());

        state.close();
        assert_eq!(state.phase, SessionPhase::Closed);
        assert!(!state.is_open());
    }

    #[test]
    fn test_stream_tracking() {
        let mut state = SessionState::new(1, addr());

        state.track_stream("cam1", 1);
        state.track_stream("cam2", 2);
        state.track_stream("cam1", 3);

        assert_eq!(state.stream_count(), 2);
        assert_eq!(state.stream_generation("cam1"), Some(3));
        assert_eq!(state.untrack_stream("cam2"), Some(2));

        let drained = state.drain_streams();
        assert_eq!(drained, vec![("cam1".to_string(), 3)]);
        assert_eq!(state.stream_count(), 0);
    }
}
