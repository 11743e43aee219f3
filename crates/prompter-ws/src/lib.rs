//! WebSocket boundary: text frames in, routed messages out.
//!
//! Each socket gets a fresh connection id and an outbound queue drained by
//! the writer half; the reader half feeds decoded frames to the
//! [`SessionRouter`]. Undecodable frames are dropped, and a closing socket
//! releases every subscription the connection held.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use prompter_core::{
    ConnectionId, Message, MessageBus, OutboundSink, SessionRouter, SinkClosed, ToolRegistry,
    deserialize_message, serialize_message,
};

struct ServerState {
    router: SessionRouter,
    next_connection: AtomicU64,
}

/// Build the axum application serving the `/ws` endpoint.
pub fn app(bus: Arc<MessageBus>, registry: Arc<ToolRegistry>) -> Router {
    let state = Arc::new(ServerState {
        router: SessionRouter::new(bus, registry),
        next_connection: AtomicU64::new(0),
    });
    Router::new().route("/ws", get(upgrade)).with_state(state)
}

/// Bind `addr` and serve until `shutdown` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    bus: Arc<MessageBus>,
    registry: Arc<ToolRegistry>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "listening for websocket clients");

    axum::serve(listener, app(bus, registry))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn upgrade(
    State(state): State<Arc<ServerState>>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(state, socket))
}

/// Outbound sink backed by the connection's writer queue.
struct QueueSink {
    tx: mpsc::UnboundedSender<Message>,
}

#[async_trait]
impl OutboundSink for QueueSink {
    async fn send(&self, message: Message) -> Result<(), SinkClosed> {
        self.tx.send(message).map_err(|_| SinkClosed)
    }
}

async fn handle_socket(state: Arc<ServerState>, socket: WebSocket) {
    let connection = ConnectionId::from(state.next_connection.fetch_add(1, Ordering::Relaxed));
    tracing::info!(%connection, "client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn OutboundSink> = Arc::new(QueueSink { tx: out_tx });

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let frame = serialize_message(&message);
            if ws_tx.send(WsFrame::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(WsFrame::Text(text)) => match deserialize_message(&text) {
                Some(message) => state.router.handle_message(connection, message, &sink),
                None => {
                    tracing::debug!(%connection, "dropping undecodable frame");
                }
            },
            Ok(WsFrame::Close(_)) => break,
            // Binary frames are not part of the protocol; ping/pong is
            // handled by axum.
            Ok(_) => {}
            Err(error) => {
                tracing::debug!(%connection, %error, "websocket read failed");
                break;
            }
        }
    }

    state.router.handle_disconnect(connection);
    writer.abort();
    tracing::info!(%connection, "client disconnected");
}
