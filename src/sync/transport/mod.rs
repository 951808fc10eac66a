//! Transport strategies
//!
//! All three deliver "the document changed" to a participant; they differ in
//! what the network allows. Exactly one runs per engine. A transport never
//! decides whether a document is adopted: it hands every received document
//! to the [`RemoteSink`], which applies the admission rule.

pub mod polling;
pub mod socket;
pub mod stream;

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::{SyncConfig, TransportKind};
use crate::error::{Result, RetryPolicy};
use crate::state::StateDocument;
use crate::storage::StateStore;

pub use polling::PollingTransport;
pub use socket::SocketTransport;
pub use stream::StreamTransport;

/// Live-connectivity as seen by the active transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No transport running.
    Idle,
    Connecting,
    /// Connected (push) or polling on schedule.
    Connected,
    /// Push connection lost; a reconnect is scheduled.
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

type ApplyFn = dyn Fn(StateDocument) -> bool + Send + Sync;

/// Where a transport delivers what it receives.
#[derive(Clone)]
pub struct RemoteSink {
    apply: Arc<ApplyFn>,
    status: Arc<watch::Sender<ConnectionStatus>>,
}

impl RemoteSink {
    pub fn new<F>(apply: F, status: Arc<watch::Sender<ConnectionStatus>>) -> Self
    where
        F: Fn(StateDocument) -> bool + Send + Sync + 'static,
    {
        Self {
            apply: Arc::new(apply),
            status,
        }
    }

    /// Offer a received document. Returns whether it was adopted.
    pub fn deliver(&self, doc: StateDocument) -> bool {
        (self.apply)(doc)
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Spawn the background work. Connection failures are not errors here;
    /// they are retried in the background and reported through the sink.
    fn start(&mut self, sink: RemoteSink) -> Result<()>;

    /// Push a locally published document to peers. Only push-socket sends
    /// anything; the other strategies rely on the endpoint write.
    fn broadcast(&self, _doc: &StateDocument) -> Result<()> {
        Ok(())
    }

    /// Release the interval, socket or stream.
    fn stop(&mut self);
}

/// Build the transport selected by `config`.
pub fn build(
    config: &SyncConfig,
    client_id: &str,
    store: Arc<dyn StateStore>,
) -> Box<dyn Transport> {
    let reconnect = RetryPolicy::reconnect(config.reconnect_delay());

    match config.transport {
        TransportKind::Polling => Box::new(PollingTransport::new(store, config.poll_interval())),
        TransportKind::PushSocket => Box::new(SocketTransport::new(
            config.socket_url(),
            client_id.to_string(),
            reconnect,
        )),
        TransportKind::PushStream => Box::new(StreamTransport::new(
            config.stream_url(),
            client_id.to_string(),
            reconnect,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn builds_selected_kind() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        for kind in [
            TransportKind::Polling,
            TransportKind::PushSocket,
            TransportKind::PushStream,
        ] {
            let config = SyncConfig::default().with_transport(kind);
            assert_eq!(build(&config, "c1", store.clone()).kind(), kind);
        }
    }

    #[test]
    fn sink_reports_status_changes_once() {
        let (tx, mut rx) = watch::channel(ConnectionStatus::Idle);
        let sink = RemoteSink::new(|_| true, Arc::new(tx));

        sink.set_status(ConnectionStatus::Connected);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionStatus::Connected);

        sink.set_status(ConnectionStatus::Connected);
        assert!(!rx.has_changed().unwrap());
    }
}
