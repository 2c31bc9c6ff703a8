use futures_util::future::{join_all, BoxFuture};
use shared::ServerMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, error, warn};

pub type ClientId = u64;

#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("Client connection closed")]
    Closed,

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Send timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unknown client {0}")]
    UnknownClient(ClientId),

    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outbound half of one client connection.
pub trait ClientSink: Send + Sync {
    fn send<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, Result<(), BroadcastError>>;
}

/// Set of connected clients with concurrent, isolated fan-out.
pub struct BroadcastHub {
    clients: RwLock<HashMap<ClientId, Arc<dyn ClientSink>>>,
    next_id: AtomicU64,
    send_timeout: Duration,
}

impl BroadcastHub {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            send_timeout,
        }
    }

    pub async fn register(&self, sink: Arc<dyn ClientSink>) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut clients = self.clients.write().await;
        clients.insert(id, sink);
        debug!("Client {} registered ({} connected)", id, clients.len());
        id
    }

    pub async fn unregister(&self, id: ClientId) {
        let mut clients = self.clients.write().await;
        if clients.remove(&id).is_some() {
            debug!("Client {} unregistered ({} connected)", id, clients.len());
        }
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Send to a single client, e.g. the greeting on connect.
    pub async fn send_to(
        &self,
        id: ClientId,
        message: &ServerMessage,
    ) -> Result<(), BroadcastError> {
        let sink = self
            .clients
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(BroadcastError::UnknownClient(id))?;
        let payload = message.to_json()?;
        self.send_one(sink.as_ref(), &payload).await
    }

    /// Send `message` to every client concurrently. Clients whose send fails
    /// or times out are dropped from the set. Returns how many received it.
    pub async fn broadcast(&self, message: &ServerMessage) -> usize {
        let targets: Vec<(ClientId, Arc<dyn ClientSink>)> = {
            let clients = self.clients.read().await;
            if clients.is_empty() {
                return 0;
            }
            clients
                .iter()
                .map(|(id, sink)| (*id, Arc::clone(sink)))
                .collect()
        };

        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize broadcast: {}", e);
                return 0;
            }
        };

        let outcomes = join_all(targets.iter().map(|(id, sink)| {
            let payload = payload.as_str();
            async move { (*id, self.send_one(sink.as_ref(), payload).await) }
        }))
        .await;

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Dropping client {}: {}", id, e);
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let mut clients = self.clients.write().await;
            for id in failed {
                clients.remove(&id);
            }
        }

        delivered
    }

    async fn send_one(&self, sink: &dyn ClientSink, payload: &str) -> Result<(), BroadcastError> {
        match timeout(self.send_timeout, sink.send(payload)).await {
            Ok(result) => result,
            Err(_) => Err(BroadcastError::Timeout(self.send_timeout)),
        }
    }
}
