//! Statistics for relayed streams

use std::time::{Duration, Instant};

/// Counters for one relay
#[derive(Debug, Clone)]
pub struct RelayStats {
    /// Stream id
    pub stream_id: String,
    /// When forwarding started
    pub started_at: Instant,
    /// Chunks written to the connection
    pub chunks: u64,
    /// Payload bytes written to the connection
    pub bytes: u64,
}

impl RelayStats {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            started_at: Instant::now(),
            chunks: 0,
            bytes: 0,
        }
    }

    /// Count one forwarded chunk
    pub fn record_chunk(&mut self, len: usize) {
        self.chunks += 1;
        self.bytes += len as u64;
    }

    /// Time since forwarding started
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Average bitrate (bits/sec) over the whole relay
    pub fn bitrate(&self) -> u64 {
        let millis = self.duration().as_millis() as u64;
        if millis == 0 {
            return 0;
        }
        self.bytes * 8 * 1000 / millis
    }
}
