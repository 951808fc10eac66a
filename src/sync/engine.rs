use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::sync::watch;
use uuid::Uuid;

use super::transport::{self, ConnectionStatus, RemoteSink, Transport};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::state::{admit, next_stamp, now_millis, StateDocument, StatePatch};
use crate::storage::StateStore;

type Callback = Arc<dyn Fn(&StateDocument) + Send + Sync>;

/// Handle to one participant's view of the shared document.
///
/// Cheap to clone; every clone drives the same engine. Nothing runs until
/// [`SyncEngine::start`] and everything background stops on
/// [`SyncEngine::stop`] or when the last handle is dropped.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    client_id: RwLock<String>,
    config: RwLock<SyncConfig>,
    store: RwLock<Arc<dyn StateStore>>,
    current: RwLock<StateDocument>,
    subscribers: Mutex<Vec<(u64, Callback)>>,
    next_subscriber: AtomicU64,
    publish_lock: tokio::sync::Mutex<()>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    // Held across "replace current + notify" and across subscribe's replay,
    // so every subscriber sees stamps in increasing order. Reentrant so a
    // callback may subscribe.
    delivery: ReentrantMutex<()>,
}

impl EngineInner {
    /// Adopt `doc` if it wins the admission rule against the in-memory copy,
    /// then notify subscribers. Returns whether it was adopted.
    fn apply(&self, doc: StateDocument) -> bool {
        let _delivery = self.delivery.lock();

        {
            let mut current = self.current.write();
            if !admit(&doc, Some(&current)).is_accepted() {
                tracing::trace!(
                    candidate = doc.last_updated,
                    current = current.last_updated,
                    "ignoring stale document"
                );
                return false;
            }
            *current = doc.clone();
        }

        let callbacks: Vec<Callback> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(&doc);
        }
        true
    }

    fn stop_transport(&self) {
        if let Some(mut active) = self.transport.lock().take() {
            tracing::debug!(transport = %active.kind(), "stopping transport");
            active.stop();
        }
        self.status.send_replace(ConnectionStatus::Idle);
    }
}

impl SyncEngine {
    pub fn new(config: SyncConfig, store: Arc<dyn StateStore>) -> Self {
        let client_id = config.client_id.clone().unwrap_or_else(generate_client_id);
        let (status, _) = watch::channel(ConnectionStatus::Idle);

        Self {
            inner: Arc::new(EngineInner {
                client_id: RwLock::new(client_id),
                config: RwLock::new(config),
                store: RwLock::new(store),
                current: RwLock::new(StateDocument::default()),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(1),
                publish_lock: tokio::sync::Mutex::new(()),
                transport: Mutex::new(None),
                status: Arc::new(status),
                delivery: ReentrantMutex::new(()),
            }),
        }
    }

    /// Engine with the persistence backend named in `config`.
    pub fn from_config(config: SyncConfig) -> Result<Self> {
        let store = config.open_store()?;
        Ok(Self::new(config, store))
    }

    /// Load the stored document and start the configured transport.
    ///
    /// An unreadable store is logged and the engine keeps its current copy;
    /// only an unusable transport configuration is an error.
    pub async fn start(&self) -> Result<()> {
        let store = self.inner.store.read().clone();

        match store.get_state().await {
            Ok(Some(doc)) => {
                let stamp = doc.last_updated;
                if self.inner.apply(doc) {
                    tracing::debug!(last_updated = stamp, "loaded stored document");
                }
            }
            Ok(None) => tracing::debug!(store = store.name(), "no stored document, using default"),
            Err(err) => tracing::warn!(store = store.name(), "initial load failed: {err}"),
        }

        let config = self.inner.config.read().clone();
        let client_id = self.client_id();
        let mut active = transport::build(&config, &client_id, store);

        self.inner.stop_transport();
        active.start(self.sink())?;

        tracing::info!(transport = %active.kind(), client_id = %client_id, "sync engine started");
        *self.inner.transport.lock() = Some(active);
        Ok(())
    }

    /// Release the polling interval, socket or stream.
    pub fn stop(&self) {
        self.inner.stop_transport();
    }

    /// Swap configuration and store, restarting the transport. Subscribers
    /// stay registered.
    pub async fn reconfigure(&self, config: SyncConfig, store: Arc<dyn StateStore>) -> Result<()> {
        self.stop();

        if let Some(id) = config.client_id.clone() {
            *self.inner.client_id.write() = id;
        }
        *self.inner.config.write() = config;
        *self.inner.store.write() = store;

        self.start().await
    }

    /// Merge `patch` onto the current document, stamp it and persist it.
    ///
    /// Publishes are serialized. When the store write fails the in-memory
    /// copy is left untouched and the error is returned. On success the
    /// returned document is the one this participant now holds, which is
    /// the store's newer document when this participant's copy was behind.
    pub async fn publish(&self, patch: StatePatch) -> Result<StateDocument> {
        let _serial = self.inner.publish_lock.lock().await;

        let base = self.current();
        let mut candidate = base.merged(patch);
        candidate.stamp(self.client_id(), next_stamp(base.last_updated, now_millis()));

        let store = self.inner.store.read().clone();
        let stored = store.save_state(&candidate).await?;
        if stored.last_updated != candidate.last_updated {
            tracing::debug!(
                candidate = candidate.last_updated,
                stored = stored.last_updated,
                "store kept a newer document"
            );
        }

        self.inner.apply(stored);
        let adopted = self.current();

        if let Some(active) = self.inner.transport.lock().as_ref() {
            if let Err(err) = active.broadcast(&adopted) {
                tracing::debug!(transport = %active.kind(), "broadcast skipped: {err}");
            }
        }

        tracing::info!(
            last_updated = adopted.last_updated,
            by = %adopted.last_updated_by,
            "published state"
        );
        Ok(adopted)
    }

    /// Offer a document received out of band. Returns whether it was adopted.
    pub fn apply_remote(&self, doc: StateDocument) -> bool {
        self.inner.apply(doc)
    }

    /// Register `callback`. It runs once with the current document before
    /// this returns, then after every adopted update.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StateDocument) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);

        let _delivery = self.inner.delivery.lock();
        let snapshot = self.current();
        callback(&snapshot);
        self.inner.subscribers.lock().push((id, callback));

        Subscription {
            id,
            engine: Arc::downgrade(&self.inner),
        }
    }

    pub fn current(&self) -> StateDocument {
        self.inner.current.read().clone()
    }

    pub fn client_id(&self) -> String {
        self.inner.client_id.read().clone()
    }

    pub fn config(&self) -> SyncConfig {
        self.inner.config.read().clone()
    }

    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    fn sink(&self) -> RemoteSink {
        let engine = Arc::downgrade(&self.inner);
        RemoteSink::new(
            move |doc| engine.upgrade().is_some_and(|inner| inner.apply(doc)),
            self.inner.status.clone(),
        )
    }
}

/// Returned by [`SyncEngine::subscribe`]. Dropping it keeps the callback
/// registered; call [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    engine: Weak<EngineInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.engine.upgrade() {
            inner.subscribers.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

fn generate_client_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("client-{}", &id[..8])
}
