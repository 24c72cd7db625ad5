//! Client session
//!
//! Handles the control messages of one connection. Transport-agnostic: text
//! and binary frames are fed in by the server, and everything going back to
//! the peer is queued on the outbound channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::protocol::{ControlMessage, FrameMode, OutboundFrame, ProtocolError, ServerMessage};
use crate::registry::{CameraStreamRequest, RegistryError, StreamRegistry};
use crate::relay::Relay;

use super::state::SessionState;

/// Per-connection behavior
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Binary framing for relayed output
    pub frame_mode: FrameMode,
    /// How long a relay waits on a full outbound queue
    pub write_timeout: Duration,
    /// Stop the streams this session started when it closes
    pub stop_streams_on_disconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_mode: FrameMode::Raw,
            write_timeout: Duration::from_secs(5),
            stop_streams_on_disconnect: true,
        }
    }
}

/// One client connection
pub struct ClientSession {
    state: SessionState,
    registry: Arc<StreamRegistry>,
    outbound: mpsc::Sender<OutboundFrame>,
    config: SessionConfig,
}

impl ClientSession {
    pub fn new(
        state: SessionState,
        registry: Arc<StreamRegistry>,
        outbound: mpsc::Sender<OutboundFrame>,
        config: SessionConfig,
    ) -> Self {
        Self {
            state,
            registry,
            outbound,
            config,
        }
    }

    /// Session state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Handle an inbound text frame
    ///
    /// Undecodable input is answered with a generic error; the session stays
    /// open.
    pub async fn handle_text(&mut self, text: &str) {
        if !self.state.is_open() {
            return;
        }

        match ControlMessage::decode(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                tracing::debug!(session_id = self.state.id, error = %e, "Bad control message");
                self.send(ServerMessage::error(None, e.to_string())).await;
            }
        }
    }

    /// Handle an inbound binary frame
    pub async fn handle_binary(&mut self, data: &[u8]) {
        if !self.state.is_open() {
            return;
        }
        tracing::debug!(session_id = self.state.id, len = data.len(), "Unexpected binary frame");
        let e = ProtocolError::UnexpectedBinary;
        self.send(ServerMessage::error(None, e.to_string())).await;
    }

    /// Handle a decoded control message
    ///
    /// Ignored once the session is closed.
    pub async fn handle_message(&mut self, message: ControlMessage) {
        if !self.state.is_open() {
            tracing::debug!(session_id = self.state.id, "Message after close ignored");
            return;
        }

        match message {
            ControlMessage::StartStream { id, source_url } => {
                self.start_stream(id, source_url).await;
            }
            ControlMessage::StopStream { id } => self.stop_stream(id).await,
        }
    }

    async fn start_stream(&mut self, id: Option<String>, source_url: Option<String>) {
        let request = match CameraStreamRequest::new(
            id.unwrap_or_default(),
            source_url.unwrap_or_default(),
        ) {
            Ok(request) => request,
            Err(e) => return self.report(e).await,
        };

        if self.config.frame_mode == FrameMode::Raw {
            self.prune_finished().await;
            if self.state.stream_count() > 0 && self.state.stream_generation(&request.id).is_none() {
                tracing::warn!(
                    session_id = self.state.id,
                    stream = %request.id,
                    "Second stream on an untagged connection; binary frames will interleave"
                );
            }
        }

        tracing::info!(
            session_id = self.state.id,
            peer = %self.state.peer_addr,
            stream = %request.id,
            "Start requested"
        );

        match self.registry.start(request).await {
            Ok(handle) => {
                self.state.track_stream(&handle.id, handle.generation);
                Relay::new(
                    handle,
                    Arc::clone(&self.registry),
                    self.outbound.clone(),
                    self.config.frame_mode,
                    self.config.write_timeout,
                )
                .spawn();
            }
            Err(e) => self.report(e).await,
        }
    }

    async fn stop_stream(&mut self, id: Option<String>) {
        let Some(id) = id.filter(|id| !id.trim().is_empty()) else {
            self.send(ServerMessage::error(None, "Missing stream id")).await;
            return;
        };
        let id = id.trim();

        tracing::info!(session_id = self.state.id, stream = %id, "Stop requested");

        self.registry.stop(id).await;
        self.state.untrack_stream(id);
    }

    /// Close the session
    ///
    /// Stops the streams this session started, unless they were replaced
    /// since or the config says to leave them running. Closing twice is a
    /// no-op.
    pub async fn close(&mut self) {
        if !self.state.is_open() {
            return;
        }
        self.state.close();
        let streams = self.state.drain_streams();

        if self.config.stop_streams_on_disconnect {
            for (id, generation) in &streams {
                self.registry.stop_generation(id, *generation).await;
            }
        }

        tracing::info!(
            session_id = self.state.id,
            peer = %self.state.peer_addr,
            streams = streams.len(),
            duration_secs = self.state.duration().as_secs(),
            "Session closed"
        );
    }

    /// Forget streams that ended or were taken over by someone else
    async fn prune_finished(&mut self) {
        for (id, generation) in self.state.drain_streams() {
            if self.registry.generation(&id).await == Some(generation) {
                self.state.track_stream(&id, generation);
            }
        }
    }

    async fn report(&self, error: RegistryError) {
        tracing::warn!(session_id = self.state.id, error = %error, "Start failed");
        self.send(ServerMessage::error(error.id(), error.to_string())).await;
    }

    async fn send(&self, message: ServerMessage) {
        let json = match message.encode() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return;
            }
        };

        if self.outbound.send(OutboundFrame::Text(json)).await.is_err() {
            tracing::debug!(session_id = self.state.id, "Connection gone, message dropped");
        }
    }
}
