use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::state::StateDocument;

/// An accepted write, fanned out to every push client.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub state: StateDocument,
    /// Client id (or `http`) that submitted the write.
    pub origin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientKind {
    Socket,
    Stream,
}

pub struct Registration {
    pub client_id: String,
    pub kind: ClientKind,
    pub connected_at: DateTime<Utc>,
    tx: mpsc::UnboundedSender<Arc<Broadcast>>,
}

/// Push clients currently connected to this instance.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<Uuid, Registration>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        client_id: impl Into<String>,
        kind: ClientKind,
    ) -> (Uuid, mpsc::UnboundedReceiver<Arc<Broadcast>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = Uuid::new_v4();
        let client_id = client_id.into();

        tracing::info!(%client_id, ?kind, "push client registered");
        self.clients.insert(
            key,
            Registration {
                client_id,
                kind,
                connected_at: Utc::now(),
                tx,
            },
        );
        (key, rx)
    }

    /// Attach the id a socket client announced in its `identify` message.
    pub fn identify(&self, key: &Uuid, client_id: &str) {
        if let Some(mut entry) = self.clients.get_mut(key) {
            entry.client_id = client_id.to_string();
        }
    }

    pub fn unregister(&self, key: &Uuid) {
        if let Some((_, registration)) = self.clients.remove(key) {
            tracing::info!(client_id = %registration.client_id, "push client disconnected");
        }
    }

    pub fn client_id(&self, key: &Uuid) -> Option<String> {
        self.clients.get(key).map(|entry| entry.client_id.clone())
    }

    /// Deliver to every registered client. Returns how many received it;
    /// clients whose receiver is gone are dropped.
    pub fn broadcast(&self, update: Broadcast) -> usize {
        let update = Arc::new(update);
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.clients.iter() {
            if entry.tx.send(update.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*entry.key());
            }
        }
        for key in dead {
            self.unregister(&key);
        }

        tracing::debug!(
            delivered,
            origin = %update.origin,
            last_updated = update.state.last_updated,
            "broadcast accepted write"
        );
        delivered
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn count(&self, kind: ClientKind) -> usize {
        self.clients.iter().filter(|entry| entry.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(stamp: i64) -> Broadcast {
        let mut state = StateDocument::default();
        state.last_updated = stamp;
        Broadcast {
            state,
            origin: "http".into(),
        }
    }

    #[test]
    fn broadcast_reaches_every_client() {
        let registry = ClientRegistry::new();
        let (_, mut socket) = registry.register("a", ClientKind::Socket);
        let (_, mut stream) = registry.register("b", ClientKind::Stream);

        assert_eq!(registry.broadcast(update(7)), 2);
        assert_eq!(socket.try_recv().unwrap().state.last_updated, 7);
        assert_eq!(stream.try_recv().unwrap().state.last_updated, 7);
        assert_eq!(registry.count(ClientKind::Socket), 1);
    }

    #[test]
    fn dead_clients_are_pruned() {
        let registry = ClientRegistry::new();
        let (_, rx) = registry.register("gone", ClientKind::Socket);
        let (_, _live) = registry.register("live", ClientKind::Stream);
        drop(rx);

        assert_eq!(registry.broadcast(update(1)), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn identify_renames_and_unregister_removes() {
        let registry = ClientRegistry::new();
        let (key, _rx) = registry.register("anonymous", ClientKind::Socket);

        registry.identify(&key, "panel-3");
        assert_eq!(registry.client_id(&key).as_deref(), Some("panel-3"));

        registry.unregister(&key);
        assert!(registry.is_empty());
    }
}
