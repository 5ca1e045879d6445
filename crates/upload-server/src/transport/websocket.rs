//! WebSocket listener using tokio-tungstenite.
//!
//! Accepts TCP connections, performs the WebSocket handshake on the
//! configured route, and hands accepted connections to the server loop.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::error::{CapacityError, Error as WsError};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use upload_core::{UploadError, UploadResult};

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    /// Remote address.
    pub remote_addr: SocketAddr,
}

/// An inbound application frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Binary frame; only its length is kept.
    Binary(usize),
    /// Message refused by the reader for exceeding [`MAX_WS_FRAME_SIZE`];
    /// carries the announced size. The payload is never buffered.
    Oversized(usize),
}

/// Maximum frame and message size accepted from clients (4 MiB).
pub const MAX_WS_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Reader limits applied to every accepted connection.
pub fn connection_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_WS_FRAME_SIZE);
    config.max_frame_size = Some(MAX_WS_FRAME_SIZE);
    config
}

/// Start the WebSocket listener.
///
/// Returns the bound address and a receiver that yields accepted connections.
/// Handshakes for any path other than `route` are refused with 404.
pub async fn start_listener(
    bind_addr: SocketAddr,
    route: &str,
) -> UploadResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| UploadError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener
        .local_addr()
        .map_err(|e| UploadError::Transport(format!("WS local addr: {e}")))?;

    info!(addr = %local_addr, route, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);
    let route: Arc<str> = Arc::from(route);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let route = route.clone();
                    tokio::spawn(async move {
                        let check = move |req: &Request, resp: Response| {
                            route_check(&route, req, resp)
                        };
                        match tokio_tungstenite::accept_hdr_async_with_config(
                            stream,
                            check,
                            Some(connection_config()),
                        )
                        .await
                        {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok((local_addr, rx))
}

#[allow(clippy::result_large_err)]
fn route_check(route: &str, req: &Request, resp: Response) -> Result<Response, ErrorResponse> {
    let path = req.uri().path();
    if path.trim_end_matches('/') == route.trim_end_matches('/') {
        return Ok(resp);
    }
    let mut refusal = ErrorResponse::new(Some(format!("no WebSocket route at {path}")));
    *refusal.status_mut() = StatusCode::NOT_FOUND;
    Err(refusal)
}

/// Helper: send a text message over a WebSocket.
pub async fn ws_send_text(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    text: &str,
) -> UploadResult<()> {
    ws.send(Message::Text(text.to_string()))
        .await
        .map_err(|e| UploadError::Transport(format!("WS send failed: {e}")))
}

/// Helper: close the WebSocket with the given code and reason.
pub async fn ws_close(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    code: CloseCode,
    reason: &'static str,
) -> UploadResult<()> {
    ws.close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
    .await
    .map_err(|e| UploadError::Transport(format!("WS close failed: {e}")))
}

/// Helper: receive the next application frame from a WebSocket.
///
/// Returns `None` if the connection is closed. Pings are answered here.
/// After [`Frame::Oversized`] the stream is out of sync and must be closed.
pub async fn ws_recv(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
) -> UploadResult<Option<Frame>> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(Frame::Text(text))),
            Some(Ok(Message::Binary(data))) => return Ok(Some(Frame::Binary(data.len()))),
            Some(Ok(Message::Close(frame))) => {
                let code = frame.map(|f| u16::from(f.code));
                debug!(code, "WebSocket close frame received");
                return Ok(None);
            }
            Some(Ok(Message::Ping(payload))) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            Some(Ok(_)) => {
                // Pong and raw frames
                continue;
            }
            Some(Err(WsError::Capacity(CapacityError::MessageTooLong { size, max_size }))) => {
                debug!(size, max_size, "WebSocket message over size limit");
                return Ok(Some(Frame::Oversized(size)));
            }
            Some(Err(e)) => {
                return Err(UploadError::Transport(format!("WS recv failed: {e}")));
            }
            None => return Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> Request {
        Request::builder()
            .uri(format!("ws://localhost{path}"))
            .body(())
            .unwrap()
    }

    #[test]
    fn route_check_accepts_configured_path() {
        assert!(route_check("/ws/file-transfer/", &request("/ws/file-transfer/"), Response::default()).is_ok());
        assert!(route_check("/ws/file-transfer/", &request("/ws/file-transfer"), Response::default()).is_ok());
    }

    #[test]
    fn reader_limits_match_frame_size() {
        let config = connection_config();
        assert_eq!(config.max_message_size, Some(MAX_WS_FRAME_SIZE));
        assert_eq!(config.max_frame_size, Some(MAX_WS_FRAME_SIZE));
    }

    #[test]
    fn route_check_refuses_other_paths() {
        let refusal = route_check("/ws/file-transfer/", &request("/other"), Response::default())
            .unwrap_err();
        assert_eq!(refusal.status(), StatusCode::NOT_FOUND);
    }
}
