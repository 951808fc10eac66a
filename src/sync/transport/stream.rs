use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use url::Url;

use super::{ConnectionStatus, RemoteSink, Transport};
use crate::config::TransportKind;
use crate::error::{Result, RetryPolicy, SyncError};
use crate::state::StateDocument;
use crate::sync::protocol::STATE_EVENT;

/// One-directional server-push stream (SSE). Receives documents only; local
/// publishes reach the endpoint through the store write.
pub struct StreamTransport {
    url: String,
    client_id: String,
    reconnect: RetryPolicy,
    task: Option<JoinHandle<()>>,
}

impl StreamTransport {
    pub fn new(url: String, client_id: String, reconnect: RetryPolicy) -> Self {
        Self {
            url,
            client_id,
            reconnect,
            task: None,
        }
    }
}

impl Transport for StreamTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::PushStream
    }

    fn start(&mut self, sink: RemoteSink) -> Result<()> {
        self.stop();

        let url = Url::parse(&self.url)
            .map_err(|e| SyncError::Config(format!("invalid stream url '{}': {e}", self.url)))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(SyncError::transport)?;

        self.task = Some(tokio::spawn(run(
            client,
            url,
            self.client_id.clone(),
            self.reconnect.clone(),
            sink,
        )));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    client: reqwest::Client,
    url: Url,
    client_id: String,
    reconnect: RetryPolicy,
    sink: RemoteSink,
) {
    let mut attempt: u32 = 0;

    loop {
        sink.set_status(ConnectionStatus::Connecting);

        match open(&client, &url, &client_id).await {
            Ok(response) => {
                attempt = 0;
                tracing::info!(url = %url, client_id = %client_id, "event stream connected");
                sink.set_status(ConnectionStatus::Connected);
                consume(response, &sink).await;
                tracing::warn!(url = %url, "event stream ended");
            }
            Err(err) => tracing::warn!(url = %url, "event stream connect failed: {err}"),
        }

        sink.set_status(ConnectionStatus::Disconnected);
        attempt = attempt.saturating_add(1);
        tokio::time::sleep(reconnect.delay_for_attempt(attempt)).await;
    }
}

async fn open(client: &reqwest::Client, url: &Url, client_id: &str) -> Result<reqwest::Response> {
    let response = client
        .get(url.clone())
        .query(&[("clientId", client_id)])
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(SyncError::transport)?;

    if !response.status().is_success() {
        return Err(SyncError::transport(format!(
            "event stream refused with {}",
            response.status()
        )));
    }
    Ok(response)
}

async fn consume(response: reqwest::Response, sink: &RemoteSink) {
    forward(response.bytes_stream(), sink).await;
}

/// Decode `text/event-stream` bytes and offer every `state` event to `sink`.
/// Unnamed events are treated as `state`. Returns when the body ends or
/// fails.
pub async fn forward<S, B, E>(body: S, sink: &RemoteSink)
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut events = std::pin::pin!(body.eventsource());

    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!("event stream read error: {err}");
                return;
            }
        };

        if event.event != STATE_EVENT && event.event != "message" {
            continue;
        }
        match serde_json::from_str::<StateDocument>(&event.data) {
            Ok(doc) => {
                let stamp = doc.last_updated;
                if sink.deliver(doc) {
                    tracing::debug!(last_updated = stamp, "adopted streamed state");
                }
            }
            Err(err) => tracing::debug!("ignoring unparseable stream event: {err}"),
        }
    }
}
