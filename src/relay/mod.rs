//! Relay loop
//!
//! Forwards one transcoder's output onto the connection that started it.
//!
//! ```text
//!   OutputChannel ──next_chunk()──► Relay ──send()──► mpsc ──► socket writer
//!                                     ▲
//!                      shutdown watch ┘ (stop / replacement)
//! ```
//!
//! Each queued chunk carries the stream's shutdown signal, so the writer drops
//! whatever is still queued once the stream is stopped or replaced.
//!
//! The outbound queue is bounded. A send that does not complete within the
//! write timeout means the client is wedged, and the stream is dropped rather
//! than buffered.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::protocol::{FrameMode, MediaFrame, OutboundFrame, ServerMessage};
use crate::registry::{StreamHandle, StreamRegistry};
use crate::stats::RelayStats;
use crate::transcoder::ProcessExit;

/// Why a relay stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEnd {
    /// The transcoder closed its output
    EndOfStream(Option<ProcessExit>),
    /// The stream was stopped or replaced
    Stopped,
    /// The connection's writer is gone
    ConnectionClosed,
    /// The connection did not accept a chunk in time
    WriteTimeout,
    /// Reading transcoder output failed
    ReadError(String),
}

/// Forwarding task for one started stream
pub struct Relay {
    handle: StreamHandle,
    registry: Arc<StreamRegistry>,
    outbound: mpsc::Sender<OutboundFrame>,
    frame_mode: FrameMode,
    write_timeout: Duration,
}

impl Relay {
    pub fn new(
        handle: StreamHandle,
        registry: Arc<StreamRegistry>,
        outbound: mpsc::Sender<OutboundFrame>,
        frame_mode: FrameMode,
        write_timeout: Duration,
    ) -> Self {
        Self {
            handle,
            registry,
            outbound,
            frame_mode,
            write_timeout,
        }
    }

    /// Spawn the relay onto the runtime
    pub fn spawn(self) -> tokio::task::JoinHandle<(RelayEnd, RelayStats)> {
        tokio::spawn(self.run())
    }

    /// Forward until the stream ends, then clean up
    pub async fn run(mut self) -> (RelayEnd, RelayStats) {
        let id = self.handle.id.clone();
        let generation = self.handle.generation;
        let mut stats = RelayStats::new(&id);

        let end = self.forward(&mut stats).await;

        match &end {
            RelayEnd::ConnectionClosed | RelayEnd::WriteTimeout | RelayEnd::ReadError(_) => {
                // nobody is reading this stream anymore
                self.registry.stop_generation(&id, generation).await;
            }
            RelayEnd::EndOfStream(Some(exit)) if exit.is_fault() => {
                self.notify(ServerMessage::error(
                    Some(&id),
                    format!("Stream {} ended: transcoder {}", id, exit),
                ));
            }
            RelayEnd::EndOfStream(_) | RelayEnd::Stopped => {}
        }

        tracing::info!(
            stream = %id,
            generation = generation,
            end = ?end,
            chunks = stats.chunks,
            bytes = stats.bytes,
            bitrate = stats.bitrate(),
            duration_ms = stats.duration().as_millis() as u64,
            "Relay finished"
        );

        (end, stats)
    }

    async fn forward(&mut self, stats: &mut RelayStats) -> RelayEnd {
        let id = self.handle.id.clone();
        let mut shutdown = self.handle.shutdown.clone();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => return RelayEnd::Stopped,
                chunk = self.handle.output.next_chunk() => chunk,
            };

            let data = match chunk {
                Ok(Some(data)) => data,
                Ok(None) => {
                    let exit = wait_exit(&mut self.handle.exited).await;
                    return RelayEnd::EndOfStream(exit);
                }
                Err(e) => return RelayEnd::ReadError(e.to_string()),
            };

            if *shutdown.borrow() {
                return RelayEnd::Stopped;
            }

            let len = data.len();
            let frame = OutboundFrame::Binary(MediaFrame::new(
                self.frame_mode.encode(&id, data),
                self.handle.shutdown.clone(),
            ));

            let sent = tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => return RelayEnd::Stopped,
                sent = tokio::time::timeout(self.write_timeout, self.outbound.send(frame)) => sent,
            };

            match sent {
                Ok(Ok(())) => stats.record_chunk(len),
                Ok(Err(_)) => return RelayEnd::ConnectionClosed,
                Err(_) => {
                    tracing::warn!(
                        stream = %id,
                        timeout_ms = self.write_timeout.as_millis() as u64,
                        "Client not keeping up, dropping stream"
                    );
                    return RelayEnd::WriteTimeout;
                }
            }
        }
    }

    fn notify(&self, message: ServerMessage) {
        match message.encode() {
            Ok(json) => {
                // best effort; a full queue means the client is already behind
                if self.outbound.try_send(OutboundFrame::Text(json)).is_err() {
                    tracing::debug!(stream = %self.handle.id, "Could not deliver stream notice");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize message"),
        }
    }
}

/// Resolves once a stop is signalled
///
/// A dropped sender only means the registry entry went away after the process
/// exited on its own; the relay keeps draining output in that case.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn wait_exit(exited: &mut watch::Receiver<Option<ProcessExit>>) -> Option<ProcessExit> {
    match exited.wait_for(Option::is_some).await {
        Ok(exit) => *exit,
        Err(_) => None,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::protocol::decode_tagged;
    use crate::registry::{CameraStreamRequest, RegistryConfig};
    use crate::transcoder::TranscoderCommand;

    fn registry(script: &str) -> Arc<StreamRegistry> {
        let config = RegistryConfig::default()
            .command(TranscoderCommand::new("sh", ["-c", script, "{source}"]))
            .kill_timeout(Duration::from_millis(500));
        Arc::new(StreamRegistry::with_config(config))
    }

    async fn start(registry: &Arc<StreamRegistry>, id: &str, source: &str) -> StreamHandle {
        registry
            .start(CameraStreamRequest::new(id, source).unwrap())
            .await
            .unwrap()
    }

    async fn next_binary(rx: &mut mpsc::Receiver<OutboundFrame>) -> MediaFrame {
        loop {
            match rx.recv().await {
                Some(OutboundFrame::Binary(media)) => return media,
                Some(OutboundFrame::Text(_)) => continue,
                None => panic!("outbound closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_relays_until_end_of_stream() {
        let registry = registry("printf one; sleep 0.1; printf two");
        let handle = start(&registry, "cam1", "src").await;
        let (tx, mut rx) = mpsc::channel(16);

        let relay = Relay::new(handle, registry.clone(), tx, FrameMode::Raw, Duration::from_secs(1));
        let (end, stats) = relay.run().await;

        assert!(matches!(end, RelayEnd::EndOfStream(Some(exit)) if exit.success()));
        assert_eq!(stats.bytes, 6);

        let mut received = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let OutboundFrame::Binary(media) = frame {
                assert!(!media.is_stale());
                received.extend_from_slice(media.data());
            }
        }
        assert_eq!(received, b"onetwo");
    }

    #[tokio::test]
    async fn test_fault_sends_error_notice() {
        let registry = registry("printf x; exit 2");
        let handle = start(&registry, "cam1", "src").await;
        let (tx, mut rx) = mpsc::channel(16);

        let (end, _) = Relay::new(handle, registry.clone(), tx, FrameMode::Raw, Duration::from_secs(1))
            .run()
            .await;
        assert!(matches!(end, RelayEnd::EndOfStream(Some(exit)) if exit.code == Some(2)));

        let mut notice = None;
        while let Ok(frame) = rx.try_recv() {
            if let OutboundFrame::Text(json) = frame {
                notice = Some(json);
            }
        }
        let notice: ServerMessage = serde_json::from_str(&notice.expect("error notice")).unwrap();
        assert!(matches!(notice, ServerMessage::Error { id: Some(ref id), .. } if id == "cam1"));
    }

    #[tokio::test]
    async fn test_stop_ends_relay() {
        let registry = registry("while :; do printf frame; sleep 0.02; done");
        let handle = start(&registry, "cam1", "src").await;
        let (tx, mut rx) = mpsc::channel(64);

        let task = Relay::new(handle, registry.clone(), tx, FrameMode::Raw, Duration::from_secs(1)).spawn();
        next_binary(&mut rx).await;

        assert!(registry.stop("cam1").await);
        let (end, _) = task.await.unwrap();
        assert_eq!(end, RelayEnd::Stopped);

        // chunks queued before the stop are never written
        while let Some(frame) = rx.recv().await {
            assert!(frame.is_stale());
        }
    }

    #[tokio::test]
    async fn test_replacement_silences_old_relay() {
        let registry = registry("while :; do printf '%s' \"$0\"; sleep 0.02; done");
        let (tx, mut rx) = mpsc::channel(64);

        let first = start(&registry, "cam1", "old").await;
        let first_task =
            Relay::new(first, registry.clone(), tx.clone(), FrameMode::Tagged, Duration::from_secs(1)).spawn();
        next_binary(&mut rx).await;

        // let the old stream fill the queue before it is replaced
        tokio::time::sleep(Duration::from_millis(200)).await;

        let second = start(&registry, "cam1", "new").await;
        let (end, _) = first_task.await.unwrap();
        assert_eq!(end, RelayEnd::Stopped);

        let second_task =
            Relay::new(second, registry.clone(), tx, FrameMode::Tagged, Duration::from_secs(1)).spawn();
        let mut stale = 0;
        let mut live = 0;
        while live < 3 {
            let frame = next_binary(&mut rx).await;
            let (id, chunk) = decode_tagged(frame.data()).unwrap();
            assert_eq!(id, "cam1");
            if chunk.windows(3).any(|w| w == b"old") {
                assert!(frame.is_stale());
                stale += 1;
            } else {
                assert!(!frame.is_stale());
                live += 1;
            }
        }
        assert!(stale > 0);

        registry.stop_all().await;
        assert_eq!(second_task.await.unwrap().0, RelayEnd::Stopped);
    }

    #[tokio::test]
    async fn test_closed_connection_stops_stream() {
        let registry = registry("while :; do printf frame; sleep 0.02; done");
        let handle = start(&registry, "cam1", "src").await;
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let (end, _) = Relay::new(handle, registry.clone(), tx, FrameMode::Raw, Duration::from_secs(1))
            .run()
            .await;

        assert_eq!(end, RelayEnd::ConnectionClosed);
        assert!(!registry.contains("cam1").await);
    }

    #[tokio::test]
    async fn test_wedged_client_stops_stream() {
        let registry = registry("while :; do printf frame; sleep 0.01; done");
        let handle = start(&registry, "cam1", "src").await;
        // capacity 1 and never read: the second chunk cannot be queued
        let (tx, _rx) = mpsc::channel(1);

        let (end, stats) = Relay::new(handle, registry.clone(), tx, FrameMode::Raw, Duration::from_millis(100))
            .run()
            .await;

        assert_eq!(end, RelayEnd::WriteTimeout);
        assert_eq!(stats.chunks, 1);
        assert!(!registry.contains("cam1").await);
    }
}
