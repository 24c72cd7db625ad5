//! Stream registry implementation
//!
//! The process-wide table of running transcoders, keyed by stream id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};

use crate::transcoder::{ProcessExit, TranscoderProcess};

use super::config::RegistryConfig;
use super::entry::{StreamEntry, StreamHandle, StreamInfo, REAP_GRACE};
use super::error::RegistryError;
use super::request::CameraStreamRequest;

/// Central registry for all running transcoders
///
/// Every mutation holds the map lock for its whole duration, including the
/// wait for a stopped process to be reaped. That keeps at most one live
/// process per id, at the cost of serializing starts and stops.
pub struct StreamRegistry {
    /// Map of stream id to running transcoder
    streams: Mutex<HashMap<String, StreamEntry>>,

    /// Next process generation
    next_generation: AtomicU64,

    /// Configuration
    config: RegistryConfig,
}

impl StreamRegistry {
    /// Create a new stream registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new stream registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Start a transcoder for `request.id`
    ///
    /// A process already registered under the id is stopped and reaped first.
    /// If the new process cannot be launched, the id is left unregistered.
    pub async fn start(
        self: &Arc<Self>,
        request: CameraStreamRequest,
    ) -> Result<StreamHandle, RegistryError> {
        let CameraStreamRequest { id, source_url } = request;
        let mut streams = self.streams.lock().await;

        if let Some(previous) = streams.remove(&id) {
            tracing::info!(
                stream = %id,
                generation = previous.generation,
                "Replacing running transcoder"
            );
            self.terminate(&id, previous).await;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let mut process = TranscoderProcess::spawn(&id, &self.config.command, &source_url)
            .map_err(|e| {
                tracing::error!(stream = %id, error = %e, "Failed to spawn transcoder");
                RegistryError::Start {
                    id: id.clone(),
                    cause: e.to_string(),
                }
            })?;

        // dropping `process` on this path kills the child
        let output = process
            .take_output(self.config.chunk_size)
            .ok_or_else(|| RegistryError::Start {
                id: id.clone(),
                cause: "transcoder stdout not captured".to_string(),
            })?;

        let pid = process.pid();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(supervise(
            Arc::downgrade(self),
            generation,
            process,
            shutdown_rx.clone(),
            exit_tx,
            self.config.kill_timeout,
        ));

        streams.insert(
            id.clone(),
            StreamEntry {
                generation,
                source_url,
                pid,
                started_at: Instant::now(),
                shutdown: shutdown_tx,
                exited: exit_rx.clone(),
            },
        );

        tracing::info!(
            stream = %id,
            generation = generation,
            pid = ?pid,
            active = streams.len(),
            "Transcoder started"
        );

        Ok(StreamHandle {
            id,
            generation,
            output,
            shutdown: shutdown_rx,
            exited: exit_rx,
        })
    }

    /// Stop the transcoder registered under `id`
    ///
    /// No-op if nothing is registered. Returns whether a process was stopped.
    pub async fn stop(&self, id: &str) -> bool {
        let mut streams = self.streams.lock().await;

        match streams.remove(id) {
            Some(entry) => {
                let generation = entry.generation;
                self.terminate(id, entry).await;
                tracing::info!(stream = %id, generation = generation, "Transcoder stopped");
                true
            }
            None => {
                tracing::debug!(stream = %id, "Stop requested for unknown stream");
                false
            }
        }
    }

    /// Stop `id` only if `generation` is still the registered process
    ///
    /// Used by relays and sessions so they never stop a replacement.
    pub async fn stop_generation(&self, id: &str, generation: u64) -> bool {
        let mut streams = self.streams.lock().await;

        let current = matches!(streams.get(id), Some(entry) if entry.generation == generation);
        if !current {
            return false;
        }

        if let Some(entry) = streams.remove(id) {
            self.terminate(id, entry).await;
        }
        tracing::info!(stream = %id, generation = generation, "Transcoder stopped");
        true
    }

    /// Record that a process exited on its own
    ///
    /// Removes the entry only if `generation` is still the registered process.
    /// Returns whether an entry was removed.
    pub async fn on_process_exit(&self, id: &str, generation: u64, exit: &ProcessExit) -> bool {
        let mut streams = self.streams.lock().await;

        let current = matches!(streams.get(id), Some(entry) if entry.generation == generation);
        if !current {
            tracing::debug!(
                stream = %id,
                generation = generation,
                "Exit of superseded transcoder ignored"
            );
            return false;
        }

        streams.remove(id);

        if exit.success() {
            tracing::info!(stream = %id, generation = generation, "Transcoder finished");
        } else {
            tracing::warn!(
                stream = %id,
                generation = generation,
                status = %exit,
                "Transcoder exited unexpectedly"
            );
        }

        true
    }

    /// Stop every registered transcoder
    pub async fn stop_all(&self) {
        let mut streams = self.streams.lock().await;
        let entries: Vec<(String, StreamEntry)> = streams.drain().collect();

        if entries.is_empty() {
            return;
        }

        tracing::info!(count = entries.len(), "Stopping all transcoders");

        let stops = entries
            .into_iter()
            .map(|(id, entry)| async move { self.terminate(&id, entry).await });
        futures::future::join_all(stops).await;
    }

    /// Check if a transcoder is registered under `id`
    pub async fn contains(&self, id: &str) -> bool {
        self.streams.lock().await.contains_key(id)
    }

    /// Generation registered under `id`
    pub async fn generation(&self, id: &str) -> Option<u64> {
        self.streams.lock().await.get(id).map(|e| e.generation)
    }

    /// Get total number of registered streams
    pub async fn stream_count(&self) -> usize {
        self.streams.lock().await.len()
    }

    /// Snapshot of registered streams, sorted by id
    pub async fn list(&self) -> Vec<StreamInfo> {
        let streams = self.streams.lock().await;

        let mut infos: Vec<StreamInfo> = streams
            .iter()
            .map(|(id, entry)| StreamInfo {
                id: id.clone(),
                generation: entry.generation,
                pid: entry.pid,
                uptime_secs: entry.uptime().as_secs(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    async fn terminate(&self, id: &str, entry: StreamEntry) {
        let generation = entry.generation;
        let budget = self.config.kill_timeout + REAP_GRACE;

        match entry.terminate(budget).await {
            Some(exit) => {
                tracing::debug!(stream = %id, generation = generation, status = %exit, "Transcoder reaped");
            }
            None => {
                tracing::error!(
                    stream = %id,
                    generation = generation,
                    budget_ms = budget.as_millis() as u64,
                    "Transcoder did not report exit in time"
                );
            }
        }
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the child for its whole life
///
/// Waits for either a shutdown request or the process exiting by itself.
/// Only the latter is reported back through `on_process_exit`; a requested
/// stop already removed the entry.
async fn supervise(
    registry: Weak<StreamRegistry>,
    generation: u64,
    mut process: TranscoderProcess,
    mut shutdown: watch::Receiver<bool>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    kill_timeout: Duration,
) {
    enum Wake {
        Shutdown,
        Exited(std::io::Result<ProcessExit>),
    }

    let id = process.id().to_string();

    // a dropped sender means the entry itself is gone, so stop as well
    let wake = tokio::select! {
        biased;
        _ = shutdown.wait_for(|stop| *stop) => Wake::Shutdown,
        result = process.wait() => Wake::Exited(result),
    };

    let exit = match wake {
        Wake::Shutdown => match process.kill(kill_timeout).await {
            Ok(outcome) => {
                tracing::debug!(stream = %id, generation = generation, outcome = ?outcome, "Transcoder terminated");
                outcome.exit().as_requested()
            }
            Err(e) => {
                tracing::error!(stream = %id, generation = generation, error = %e, "Failed to kill transcoder");
                ProcessExit::unknown(true)
            }
        },
        Wake::Exited(Ok(exit)) => exit,
        Wake::Exited(Err(e)) => {
            tracing::warn!(stream = %id, generation = generation, error = %e, "Failed to wait on transcoder");
            ProcessExit::unknown(false)
        }
    };

    exit_tx.send_replace(Some(exit));

    if !exit.requested {
        if let Some(registry) = registry.upgrade() {
            registry.on_process_exit(&id, generation, &exit).await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::transcoder::TranscoderCommand;

    fn registry(script: &str) -> Arc<StreamRegistry> {
        let config = RegistryConfig::default()
            .command(TranscoderCommand::new("sh", ["-c", script, "{source}"]))
            .kill_timeout(Duration::from_millis(500));
        Arc::new(StreamRegistry::with_config(config))
    }

    fn request(id: &str, source: &str) -> CameraStreamRequest {
        CameraStreamRequest::new(id, source).unwrap()
    }

    async fn wait_until_gone(registry: &StreamRegistry, id: &str) {
        for _ in 0..100 {
            if !registry.contains(id).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("stream {} still registered", id);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let registry = registry("exec sleep 30");

        let handle = assert_ok!(registry.start(request("cam1", "rtsp://host/cam1")).await);
        assert!(registry.contains("cam1").await);
        assert_eq!(registry.generation("cam1").await, Some(handle.generation));

        assert!(registry.stop("cam1").await);
        assert!(!registry.contains("cam1").await);

        let exit = (*handle.exited.borrow()).expect("process reaped on stop");
        assert!(exit.requested);
        assert!(*handle.shutdown.borrow());
    }

    #[tokio::test]
    async fn test_stop_unknown_is_noop() {
        let registry = registry("exec sleep 30");

        assert!(!registry.stop("missing").await);
        assert!(!registry.stop("missing").await);
        assert_eq!(registry.stream_count().await, 0);
    }

    #[tokio::test]
    async fn test_output_reaches_handle() {
        let registry = registry("printf '%s' \"$0\"; exec sleep 30");

        let mut handle = registry.start(request("cam1", "rtsp://host/cam1")).await.unwrap();
        let chunk = handle.output.next_chunk().await.unwrap().unwrap();

        assert_eq!(&chunk[..], b"rtsp://host/cam1");
        registry.stop("cam1").await;
    }

    #[tokio::test]
    async fn test_replace_keeps_single_process() {
        let registry = registry("printf '%s' \"$0\"; exec sleep 30");

        let first = registry.start(request("cam1", "rtsp://host/a")).await.unwrap();
        let mut second = registry.start(request("cam1", "rtsp://host/b")).await.unwrap();

        // the old process is gone before the new start returns
        assert!(first.exited.borrow().is_some());
        assert!(*first.shutdown.borrow());
        assert!(second.exited.borrow().is_none());

        assert_eq!(registry.stream_count().await, 1);
        assert_eq!(registry.generation("cam1").await, Some(second.generation));

        let chunk = second.output.next_chunk().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"rtsp://host/b");

        registry.stop_all().await;
    }

    #[tokio::test]
    async fn test_concurrent_starts_leave_one_live_process() {
        let registry = registry("exec sleep 30");

        let starts = (0..8).map(|i| {
            let registry = Arc::clone(&registry);
            async move { registry.start(request("cam1", &format!("rtsp://host/{}", i))).await }
        });
        let handles: Vec<StreamHandle> = futures::future::join_all(starts)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let live: Vec<&StreamHandle> = handles
            .iter()
            .filter(|h| h.exited.borrow().is_none())
            .collect();
        assert_eq!(live.len(), 1);
        assert_eq!(registry.generation("cam1").await, Some(live[0].generation));

        registry.stop_all().await;
        assert_eq!(registry.stream_count().await, 0);
    }

    #[tokio::test]
    async fn test_self_exit_removes_entry() {
        let registry = registry("exit 3");

        let mut handle = registry.start(request("cam1", "src")).await.unwrap();
        let exit = (*handle.exited.wait_for(Option::is_some).await.unwrap()).unwrap();

        assert_eq!(exit.code, Some(3));
        assert!(exit.is_fault());
        wait_until_gone(&registry, "cam1").await;
    }

    #[tokio::test]
    async fn test_exit_of_replaced_process_ignored() {
        let registry = registry("exec sleep 30");

        let first = registry.start(request("cam1", "src-a")).await.unwrap();
        let second = registry.start(request("cam1", "src-b")).await.unwrap();

        let exit = ProcessExit::unknown(false);
        assert!(!registry.on_process_exit("cam1", first.generation, &exit).await);
        assert_eq!(registry.generation("cam1").await, Some(second.generation));

        assert!(registry.on_process_exit("cam1", second.generation, &exit).await);
        assert!(!registry.on_process_exit("cam1", second.generation, &exit).await);
        assert!(!registry.contains("cam1").await);
    }

    #[tokio::test]
    async fn test_stop_generation_spares_replacement() {
        let registry = registry("exec sleep 30");

        let first = registry.start(request("cam1", "src-a")).await.unwrap();
        let second = registry.start(request("cam1", "src-b")).await.unwrap();

        assert!(!registry.stop_generation("cam1", first.generation).await);
        assert!(registry.contains("cam1").await);

        assert!(registry.stop_generation("cam1", second.generation).await);
        assert!(!registry.contains("cam1").await);
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_no_entry() {
        let config = RegistryConfig::default()
            .command(TranscoderCommand::new("/nonexistent/transcoder", ["{source}"]));
        let registry = Arc::new(StreamRegistry::with_config(config));

        let err = assert_err!(registry.start(request("cam1", "src")).await);
        assert_eq!(err.id(), Some("cam1"));
        assert!(matches!(err, RegistryError::Start { .. }));
        assert!(!registry.contains("cam1").await);
    }

    #[tokio::test]
    async fn test_forced_kill_on_ignored_interrupt() {
        let registry = {
            let config = RegistryConfig::default()
                .command(TranscoderCommand::new(
                    "sh",
                    ["-c", "trap '' INT; exec sleep 30", "{source}"],
                ))
                .kill_timeout(Duration::from_millis(200));
            Arc::new(StreamRegistry::with_config(config))
        };

        let handle = registry.start(request("cam1", "src")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(registry.stop("cam1").await);
        let exit = (*handle.exited.borrow()).expect("process reaped");
        assert_eq!(exit.signal, Some(libc::SIGKILL));
    }

    #[tokio::test]
    async fn test_list_hides_source() {
        let registry = registry("exec sleep 30");
        registry.start(request("cam2", "rtsp://u:p@host/2")).await.unwrap();
        registry.start(request("cam1", "rtsp://u:p@host/1")).await.unwrap();

        let list = registry.list().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "cam1");
        assert_eq!(list[1].id, "cam2");

        let json = serde_json::to_string(&list).unwrap();
        assert!(!json.contains("u:p@"));

        registry.stop_all().await;
    }
}
