//! Loopback WebSocket server for presence observers

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::BroadcastConfig;
use crate::constants::{APP_VERSION, NOTIFY_TIMEOUT};
use crate::error::NetworkError;

use super::message::BroadcastMessage;
use super::PresenceSink;

/// Messages buffered per slow client before it starts skipping
const CHANNEL_CAPACITY: usize = 64;

struct NotifierState {
    tx: broadcast::Sender<String>,
    clients: DashMap<Uuid, SocketAddr>,
}

/// Fan-out of presence events to every connected observer
pub struct BroadcastNotifier {
    state: Arc<NotifierState>,
    local_addr: SocketAddr,
    shutdown: Arc<Notify>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastNotifier {
    /// Bind and serve `GET /` (version) and `/ws` (event stream)
    pub async fn start(config: &BroadcastConfig) -> Result<Self, NetworkError> {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let state = Arc::new(NotifierState {
            tx,
            clients: DashMap::new(),
        });

        let app = Router::new()
            .route("/", get(version_handler))
            .route("/ws", get(ws_handler))
            .with_state(state.clone());

        let bind = format!("{}:{}", config.bind_address, config.port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        let server = tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            let result = axum::serve(listener, service)
                .with_graceful_shutdown(async move { signal.notified().await })
                .await;
            if let Err(e) = result {
                tracing::error!("Broadcast server error: {}", e);
            }
        });

        tracing::info!("Broadcast server listening on ws://{}/ws", local_addr);
        Ok(Self {
            state,
            local_addr,
            shutdown,
            server: Mutex::new(Some(server)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn client_count(&self) -> usize {
        self.state.clients.len()
    }

    /// Stop accepting and close the listener; idempotent
    pub async fn stop(&self) {
        let server = self.server.lock().take();
        if let Some(server) = server {
            self.shutdown.notify_one();
            let _ = server.await;
            tracing::info!("Broadcast server stopped");
        }
    }
}

impl PresenceSink for BroadcastNotifier {
    fn publish(&self, message: BroadcastMessage) {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize broadcast message: {}", e);
                return;
            }
        };
        tracing::trace!("Broadcast message: {}", json);
        // No receivers is not an error
        let _ = self.state.tx.send(json);
    }
}

async fn version_handler() -> impl IntoResponse {
    APP_VERSION
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<NotifierState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: Arc<NotifierState>) {
    let id = Uuid::new_v4();
    state.clients.insert(id, addr);
    tracing::info!("Observer {} connected from {} ({} total)", id, addr, state.clients.len());

    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.tx.subscribe();

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let json = match outgoing {
                    Ok(json) => json,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Observer {} lagged, skipped {} messages", id, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                match tokio::time::timeout(NOTIFY_TIMEOUT, sender.send(Message::Text(json))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!("Failed to notify observer {}: {}", id, e);
                        break;
                    }
                    Err(_) => {
                        tracing::warn!("Observer {} timed out, dropping", id);
                        break;
                    }
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(message)) => tracing::trace!("Observer {} sent {:?}", id, message),
                    Some(Err(e)) => {
                        tracing::debug!("Observer {} receive error: {}", id, e);
                        break;
                    }
                }
            }
        }
    }

    state.clients.remove(&id);
    tracing::info!("Observer {} disconnected ({} remaining)", id, state.clients.len());
}
