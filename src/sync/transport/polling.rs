use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::{ConnectionStatus, RemoteSink, Transport};
use crate::config::TransportKind;
use crate::error::Result;
use crate::storage::StateStore;

/// Fetches the authoritative document on a fixed interval.
///
/// The first fetch happens one full interval after start. A failed fetch is
/// logged and simply retried on the next tick.
pub struct PollingTransport {
    store: Arc<dyn StateStore>,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl PollingTransport {
    pub fn new(store: Arc<dyn StateStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            task: None,
        }
    }
}

impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    fn start(&mut self, sink: RemoteSink) -> Result<()> {
        self.stop();

        let store = self.store.clone();
        let period = self.interval;
        sink.set_status(ConnectionStatus::Connected);

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match store.get_state().await {
                    Ok(Some(doc)) => {
                        let stamp = doc.last_updated;
                        if sink.deliver(doc) {
                            tracing::debug!(last_updated = stamp, "poll picked up a newer document");
                        }
                    }
                    Ok(None) => tracing::trace!("poll: no state stored yet"),
                    Err(err) => tracing::debug!("poll failed, retrying next tick: {err}"),
                }
            }
        }));

        tracing::info!(interval_ms = period.as_millis() as u64, "polling transport started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        self.stop();
    }
}
