//! Core server: accepts WebSocket connections and runs one session per
//! connection.
//!
//! Owns the upload policy, the shared rate limiter and the file store, and
//! coordinates the lifecycle of all incoming connections.

use crate::config::ServerConfig;
use crate::limiter::{FixedWindowLimiter, MemoryWindowStore};
use crate::session::{Disposition, Session};
use crate::storage::{DiskStore, FileStore};
use crate::transfer::UploadPolicy;
use crate::transport::websocket::{self, Frame, WebSocketConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};
use upload_core::{encode_response, UploadResult};

/// How long open connections get to close after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The upload server instance.
pub struct UploadServer {
    config: ServerConfig,
    policy: Arc<UploadPolicy>,
    /// Message rate limiter shared by every connection.
    limiter: Arc<FixedWindowLimiter<MemoryWindowStore>>,
    store: Arc<dyn FileStore>,
    /// Broadcast sender for server shutdown notification.
    shutdown_tx: broadcast::Sender<()>,
}

impl UploadServer {
    /// Create a new server instance.
    pub fn new(config: ServerConfig) -> Self {
        let policy = Arc::new(config.upload.clone());
        let limiter = Arc::new(FixedWindowLimiter::new(
            config.rate_limit.clone(),
            Arc::new(MemoryWindowStore::new()),
        ));
        let store: Arc<dyn FileStore> = Arc::new(DiskStore::new(&policy.save_directory));

        info!(
            max_size = policy.max_size,
            extensions = ?policy.allowed_extensions,
            save_directory = %policy.save_directory.display(),
            "upload policy loaded"
        );

        Self {
            config,
            policy,
            limiter,
            store,
            shutdown_tx: broadcast::channel(1).0,
        }
    }

    /// Handle for signalling shutdown to every open connection.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind the listener and serve until the listener closes.
    pub async fn run(self) -> UploadResult<()> {
        let (addr, ws_rx) =
            websocket::start_listener(self.config.bind_addr, &self.config.path).await?;
        info!(
            addr = %addr,
            path = %self.config.path,
            rate_limit = self.config.rate_limit.limit,
            period_secs = self.config.rate_limit.period.as_secs(),
            "upload-server ready"
        );
        Arc::new(self).serve(ws_rx).await
    }

    /// Serve connections yielded by an already started listener.
    ///
    /// Returns once the listener closes or shutdown is signalled, after every
    /// open connection has been closed (or the grace period has passed).
    pub async fn serve(self: Arc<Self>, mut ws_rx: mpsc::Receiver<WebSocketConnection>) -> UploadResult<()> {
        // Expired rate-limit records are dropped once per window.
        let gc_store = self.limiter.store().clone();
        let gc_every = self.config.rate_limit.period;
        let gc_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(gc_every);
            loop {
                interval.tick().await;
                let removed = gc_store.gc().await;
                if removed > 0 {
                    debug!(removed, "expired rate-limit records dropped");
                }
            }
        });

        let mut connections = JoinSet::new();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                conn = ws_rx.recv() => {
                    let Some(conn) = conn else {
                        info!("listener closed, shutting down");
                        break;
                    };
                    let srv = self.clone();
                    // Subscribed before spawning so no connection misses shutdown.
                    let conn_shutdown = self.shutdown_tx.subscribe();
                    connections.spawn(async move {
                        let remote = conn.remote_addr;
                        if let Err(e) = srv.handle_websocket(conn, conn_shutdown).await {
                            warn!(remote = %remote, error = %e, "WebSocket connection error");
                        }
                    });
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown requested, closing connections");
                    break;
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        gc_task.abort();
        let _ = self.shutdown_tx.send(());

        let open = connections.len();
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(open, "connections still open after shutdown grace period, aborting");
            connections.abort_all();
        }
        Ok(())
    }

    /// Per-connection loop: one session, one response per inbound frame.
    async fn handle_websocket(
        &self,
        mut conn: WebSocketConnection,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> UploadResult<()> {
        let client = conn.remote_addr.ip().to_string();
        info!(client = %client, remote = %conn.remote_addr, "WebSocket connection established");

        let mut session = Session::new(
            client.clone(),
            self.policy.clone(),
            self.limiter.clone(),
            self.store.clone(),
        );

        loop {
            let frame = tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(client = %client, "shutdown signal received, closing WebSocket");
                    let _ = websocket::ws_close(&mut conn.ws_stream, CloseCode::Away, "server shutdown").await;
                    break;
                }
                result = websocket::ws_recv(&mut conn.ws_stream) => match result {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        debug!(client = %client, "WebSocket closed by peer");
                        break;
                    }
                    Err(e) => {
                        debug!(client = %client, error = %e, "WebSocket session ended");
                        break;
                    }
                },
            };

            let disposition = match frame {
                Frame::Text(text) => session.handle_frame(&text).await,
                Frame::Binary(len) => session.handle_binary(len).await,
                Frame::Oversized(len) => {
                    // The unread payload leaves the stream unusable.
                    let disposition = session.handle_oversized(len).await;
                    if let Ok(text) = encode_response(disposition.response()) {
                        let _ = websocket::ws_send_text(&mut conn.ws_stream, &text).await;
                    }
                    warn!(client = %client, len, "message over size limit, closing connection");
                    let _ = websocket::ws_close(&mut conn.ws_stream, CloseCode::Size, "message too big")
                        .await;
                    break;
                }
            };

            let text = encode_response(disposition.response())?;
            websocket::ws_send_text(&mut conn.ws_stream, &text).await?;

            if let Disposition::Close(_) = disposition {
                warn!(client = %client, "rate limit exceeded, closing connection");
                websocket::ws_close(&mut conn.ws_stream, CloseCode::Policy, "rate limit exceeded")
                    .await?;
                break;
            }
        }

        // Any partial transfer is dropped with the session.
        if let Some(transfer) = session.transfer() {
            debug!(
                client = %client,
                state = ?session.state(),
                file_name = %transfer.file_name(),
                received = transfer.received_size(),
                "discarding incomplete transfer"
            );
        }
        info!(client = %client, "WebSocket disconnected");
        Ok(())
    }
}
