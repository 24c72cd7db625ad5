//! WebSocket server
//!
//! Accepts connections, runs one [`ClientSession`] per socket and stops every
//! transcoder on shutdown.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use crate::error::Result;
use crate::protocol::OutboundFrame;
use crate::registry::{RegistryConfig, StreamRegistry};
use crate::server::config::ServerConfig;
use crate::session::{ClientSession, SessionState};

/// Camera relay server
pub struct RelayServer {
    shared: Arc<Shared>,
}

struct Shared {
    config: ServerConfig,
    registry: Arc<StreamRegistry>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl Shared {
    /// `Err` when the connection limit is reached
    fn admit(&self) -> std::result::Result<Option<OwnedSemaphorePermit>, ()> {
        match self.connection_semaphore {
            Some(ref sem) => sem.clone().try_acquire_owned().map(Some).map_err(|_| ()),
            None => Ok(None),
        }
    }
}

impl RelayServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry_config(config, RegistryConfig::default())
    }

    /// Create a new server with custom registry configuration
    pub fn with_registry_config(config: ServerConfig, registry_config: RegistryConfig) -> Self {
        Self::with_registry(config, Arc::new(StreamRegistry::with_config(registry_config)))
    }

    /// Create a new server around an existing registry
    pub fn with_registry(config: ServerConfig, registry: Arc<StreamRegistry>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            shared: Arc::new(Shared {
                config,
                registry,
                next_session_id: AtomicU64::new(1),
                connection_semaphore,
            }),
        }
    }

    /// Get a reference to the stream registry
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.shared.registry
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.shared.config.bind_addr
    }

    /// HTTP routes
    ///
    /// `/` and `/ws` accept WebSocket upgrades; `/` without an upgrade serves
    /// the index page. `/api/streams` lists running transcoders.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(root))
            .route("/ws", get(root))
            .route("/api/streams", get(list_streams))
            .with_state(Arc::clone(&self.shared))
    }

    /// Run the server
    ///
    /// This method blocks until the server fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    ///
    /// All transcoders are stopped before this returns.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.shared.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tracing::info!(addr = %listener.local_addr()?, "Relay server listening");

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = axum::serve(listener, app).into_future() => result.map_err(Into::into),
        };

        self.shared.registry.stop_all().await;

        result
    }
}

async fn root(
    State(shared): State<Arc<Shared>>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let Some(upgrade) = upgrade else {
        return index(&shared).await;
    };

    // Check connection limit
    let permit = match shared.admit() {
        Ok(permit) => permit,
        Err(()) => {
            tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
            return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
        }
    };

    let session_id = shared.next_session_id.fetch_add(1, Ordering::Relaxed);

    upgrade.on_upgrade(move |socket| async move {
        let _permit = permit;
        handle_socket(shared, socket, session_id, peer_addr).await;
    })
}

async fn index(shared: &Shared) -> Response {
    let Some(ref path) = shared.config.index_file else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read_to_string(path).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to read index page");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn list_streams(State(shared): State<Arc<Shared>>) -> impl IntoResponse {
    Json(shared.registry.list().await)
}

async fn handle_socket(
    shared: Arc<Shared>,
    socket: WebSocket,
    session_id: u64,
    peer_addr: SocketAddr,
) {
    tracing::debug!(session_id = session_id, peer = %peer_addr, "New connection");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(shared.config.outbound_capacity);

    // Sole owner of the sink; relays and the session only queue frames
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                OutboundFrame::Text(text) => Message::Text(text),
                // stream stopped or replaced while this chunk was queued
                OutboundFrame::Binary(media) if media.is_stale() => continue,
                OutboundFrame::Binary(media) => Message::Binary(media.into_data().to_vec()),
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut session = ClientSession::new(
        SessionState::new(session_id, peer_addr),
        Arc::clone(&shared.registry),
        tx,
        shared.config.session_config(),
    );

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => session.handle_text(&text).await,
            Ok(Message::Binary(data)) => session.handle_binary(&data).await,
            Ok(Message::Close(_)) => break,
            // Ping/pong is answered by axum
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(session_id = session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    session.close().await;

    // Streams left running see the closed queue on their next chunk
    writer.abort();
    if let Err(e) = writer.await {
        if !e.is_cancelled() {
            tracing::debug!(session_id = session_id, error = %e, "Writer task failed");
        }
    }

    tracing::debug!(session_id = session_id, "Connection closed");
}
