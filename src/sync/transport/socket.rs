use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::{ConnectionStatus, RemoteSink, Transport};
use crate::config::TransportKind;
use crate::error::{Result, RetryPolicy, SyncError};
use crate::state::StateDocument;
use crate::sync::protocol::SocketMessage;

type Outbound = Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>;

/// Persistent WebSocket to the endpoint.
///
/// Identifies itself on every (re)connect, applies incoming `state_update`
/// messages, and forwards local publishes as `state_update`. Reconnects
/// forever after the policy's delay.
pub struct SocketTransport {
    url: String,
    client_id: String,
    reconnect: RetryPolicy,
    outbound: Outbound,
    task: Option<JoinHandle<()>>,
}

impl SocketTransport {
    pub fn new(url: String, client_id: String, reconnect: RetryPolicy) -> Self {
        Self {
            url,
            client_id,
            reconnect,
            outbound: Arc::new(Mutex::new(None)),
            task: None,
        }
    }
}

impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::PushSocket
    }

    fn start(&mut self, sink: RemoteSink) -> Result<()> {
        self.stop();

        let url = Url::parse(&self.url)
            .map_err(|e| SyncError::Config(format!("invalid ws url '{}': {e}", self.url)))?;

        self.task = Some(tokio::spawn(run(
            url,
            self.client_id.clone(),
            self.reconnect.clone(),
            self.outbound.clone(),
            sink,
        )));
        Ok(())
    }

    fn broadcast(&self, doc: &StateDocument) -> Result<()> {
        let text = SocketMessage::state_update(doc.clone(), self.client_id.clone()).to_json()?;
        let guard = self.outbound.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| SyncError::transport("push socket is not connected"))?;
        tx.send(Message::Text(text.into()))
            .map_err(|_| SyncError::transport("push socket closed"))
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        *self.outbound.lock() = None;
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    url: Url,
    client_id: String,
    reconnect: RetryPolicy,
    outbound: Outbound,
    sink: RemoteSink,
) {
    let mut attempt: u32 = 0;

    loop {
        sink.set_status(ConnectionStatus::Connecting);

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                attempt = 0;
                tracing::info!(url = %url, client_id = %client_id, "push socket connected");
                sink.set_status(ConnectionStatus::Connected);
                session(ws, &client_id, &outbound, &sink).await;
                *outbound.lock() = None;
                tracing::warn!(url = %url, "push socket closed");
            }
            Err(err) => {
                tracing::warn!(url = %url, "push socket connect failed: {err}");
            }
        }

        sink.set_status(ConnectionStatus::Disconnected);
        attempt = attempt.saturating_add(1);
        let delay = reconnect.delay_for_attempt(attempt);
        tracing::debug!(?delay, attempt, "scheduling push socket reconnect");
        tokio::time::sleep(delay).await;
    }
}

/// Drive one connected socket until it closes or errors.
async fn session<S>(ws: S, client_id: &str, outbound: &Outbound, sink: &RemoteSink)
where
    S: futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut ws_tx, mut ws_rx) = ws.split();

    match SocketMessage::identify(client_id).to_json() {
        Ok(text) => {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        Err(err) => {
            tracing::error!("failed to encode identify message: {err}");
            return;
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    *outbound.lock() = Some(tx);

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(msg) => {
                    if ws_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let text: String = text.to_string();
                    match serde_json::from_str::<SocketMessage>(&text) {
                        Ok(SocketMessage::StateUpdate { state, client_id: origin }) => {
                            let stamp = state.last_updated;
                            if sink.deliver(state) {
                                tracing::debug!(%origin, last_updated = stamp, "adopted pushed state");
                            }
                        }
                        Ok(SocketMessage::Identify { .. }) => {}
                        Err(err) => tracing::debug!("ignoring unparseable socket message: {err}"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!("push socket read error: {err}");
                    break;
                }
            },
        }
    }
}
