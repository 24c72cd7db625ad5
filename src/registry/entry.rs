//! Stream entry types
//!
//! Per-stream state stored in the registry, and the handle given to whoever
//! started the stream.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;

use crate::transcoder::{OutputChannel, ProcessExit};

/// Extra time allowed for the forced kill and reap after `kill_timeout`
pub(super) const REAP_GRACE: Duration = Duration::from_secs(2);

/// Entry for a single running transcoder
pub struct StreamEntry {
    /// Process identity, unique for the lifetime of the registry
    pub generation: u64,

    /// Source the transcoder reads from
    pub source_url: String,

    /// OS process id
    pub pid: Option<u32>,

    /// When the transcoder was spawned
    pub started_at: Instant,

    /// Set to `true` to make the supervisor stop the process
    pub(super) shutdown: watch::Sender<bool>,

    /// Filled in by the supervisor once the process is gone
    pub(super) exited: watch::Receiver<Option<ProcessExit>>,
}

impl StreamEntry {
    /// Time since spawn
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Signal the supervisor and wait until the process has been reaped
    ///
    /// Returns `None` if the supervisor did not report within `budget`.
    pub(super) async fn terminate(mut self, budget: Duration) -> Option<ProcessExit> {
        self.shutdown.send_replace(true);

        match tokio::time::timeout(budget, self.exited.wait_for(Option::is_some)).await {
            Ok(Ok(exit)) => *exit,
            // supervisor gone without reporting; kill_on_drop reaped the child
            Ok(Err(_)) => Some(ProcessExit::unknown(true)),
            Err(_) => None,
        }
    }
}

/// Handle returned by a successful start
///
/// Carries the transcoder output plus the signals a relay needs to notice
/// that the stream was stopped or replaced.
pub struct StreamHandle {
    /// Stream id
    pub id: String,
    /// Process identity
    pub generation: u64,
    /// Transcoder stdout
    pub output: OutputChannel,
    /// Becomes `true` when the stream is stopped or replaced
    pub shutdown: watch::Receiver<bool>,
    /// Becomes `Some` when the process has exited
    pub exited: watch::Receiver<Option<ProcessExit>>,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Public view of a registered stream
///
/// Leaves out the source URL, which may embed credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    /// Stream id
    pub id: String,
    /// Process identity
    pub generation: u64,
    /// OS process id
    pub pid: Option<u32>,
    /// Seconds since spawn
    pub uptime_secs: u64,
}
