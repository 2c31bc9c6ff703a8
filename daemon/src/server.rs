use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use shared::ServerMessage;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastError, BroadcastHub, ClientSink};

/// What every connection handler needs.
#[derive(Clone)]
pub struct ServerState {
    pub hub: Arc<BroadcastHub>,
    pub provider: String,
    pub hands_enabled: bool,
}

/// WebSocket endpoint feeding the broadcast hub.
pub struct StreamServer {
    addr: String,
    state: ServerState,
}

impl StreamServer {
    pub fn new(addr: String, state: ServerState) -> Self {
        Self { addr, state }
    }

    pub fn router(state: ServerState) -> Router {
        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .with_state(state)
    }

    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener, cancel).await
    }

    /// Serve on an already bound listener until `cancel` fires.
    pub async fn serve(
        self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        info!("WebSocket server listening on ws://{}", listener.local_addr()?);

        axum::serve(listener, Self::router(self.state))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        info!("WebSocket server stopped");
        Ok(())
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ServerState) {
    let (sink, mut inbound) = socket.split();
    let id = state.hub.register(Arc::new(WsClient::new(sink))).await;
    info!("Client {} connected", id);

    let status = ServerMessage::Status {
        provider: state.provider.clone(),
        hands_enabled: state.hands_enabled,
        clients: state.hub.len().await,
    };
    if let Err(e) = state.hub.send_to(id, &status).await {
        warn!("Failed to greet client {}: {}", id, e);
    }

    // Inbound messages carry no meaning; drain until the peer goes away.
    while let Some(message) = inbound.next().await {
        match message {
            Ok(Message::Close(_)) => break,
            Ok(_) => debug!("Ignoring message from client {}", id),
            Err(e) => {
                debug!("Client {} read error: {}", id, e);
                break;
            }
        }
    }

    state.hub.unregister(id).await;
    info!("Client {} disconnected", id);
}

struct WsClient {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsClient {
    fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

impl ClientSink for WsClient {
    fn send<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, Result<(), BroadcastError>> {
        Box::pin(async move {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Text(payload.to_owned().into()))
                .await
                .map_err(|e| BroadcastError::Send(e.to_string()))
        })
    }
}
