mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use signal_sync::state::now_millis;
use signal_sync::{
    ConnectionStatus, ControlMode, MemoryStore, StateDocument, StateStore, SyncConfig, SyncEngine,
    TransportKind,
};
use tokio::time::timeout;

use common::{
    base_url, document, eventually, post_state, reserve_port, spawn_endpoint, Endpoint,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_sends_snapshot_then_each_accepted_write() -> Result<()> {
    let port = reserve_port()?;
    let store = Arc::new(MemoryStore::with_state(document(ControlMode::Auto, 1000)));
    let server = spawn_endpoint(port, store).await?;

    let response = reqwest::Client::new()
        .get(format!("{}/events", base_url(port)))
        .query(&[("clientId", "dashboard")])
        .send()
        .await?;
    assert!(response.status().is_success());
    let mut events = std::pin::pin!(response.bytes_stream().eventsource());
    let mut received: Vec<StateDocument> = Vec::new();

    while received.len() < 2 {
        let event = timeout(Duration::from_secs(3), events.next())
            .await?
            .expect("stream ended early")?;
        assert_eq!(event.event, "state");
        received.push(serde_json::from_str(&event.data)?);

        if received.len() == 1 {
            let doc = document(ControlMode::Manual, now_millis());
            post_state(port, &serde_json::to_value(&doc)?).await?;
        }
    }

    assert_eq!(received[0].last_updated, 1000);
    assert_eq!(received[1].control_mode, ControlMode::Manual);

    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stream_engine_adopts_broadcast_writes() -> Result<()> {
    let port = reserve_port()?;
    let server = spawn_endpoint(port, Arc::new(MemoryStore::new())).await?;

    let config = SyncConfig::new(base_url(port))
        .with_transport(TransportKind::PushStream)
        .with_reconnect_delay(Duration::from_millis(200))
        .with_client_id("dashboard");
    let engine = SyncEngine::from_config(config)?;
    engine.start().await?;

    let mut status = engine.connection_status();
    timeout(Duration::from_secs(5), status.wait_for(|s| s.is_live())).await??;

    let doc = document(ControlMode::Semi, now_millis());
    post_state(port, &serde_json::to_value(&doc)?).await?;

    assert!(
        eventually(Duration::from_secs(3), || engine.current().control_mode == ControlMode::Semi)
            .await,
        "stream participant never saw the write"
    );

    engine.stop();
    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stream_engine_resumes_after_endpoint_restart() -> Result<()> {
    let port = reserve_port()?;
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let endpoint = Endpoint::start(port, store.clone()).await?;

    let config = SyncConfig::new(base_url(port))
        .with_transport(TransportKind::PushStream)
        .with_reconnect_delay(Duration::from_millis(200))
        .with_client_id("dashboard");
    let engine = SyncEngine::from_config(config)?;
    engine.start().await?;
    let mut status = engine.connection_status();
    timeout(Duration::from_secs(5), status.wait_for(|s| s.is_live())).await??;

    endpoint.shutdown().await?;
    timeout(
        Duration::from_secs(5),
        status.wait_for(|s| *s == ConnectionStatus::Disconnected),
    )
    .await??;

    let endpoint = Endpoint::start(port, store).await?;
    timeout(Duration::from_secs(5), status.wait_for(|s| s.is_live())).await??;

    let doc = document(ControlMode::Manual, now_millis());
    post_state(port, &serde_json::to_value(&doc)?).await?;
    assert!(
        eventually(Duration::from_secs(3), || engine.current().control_mode == ControlMode::Manual)
            .await,
        "stream participant did not resume after reconnecting"
    );

    engine.stop();
    endpoint.shutdown().await?;
    Ok(())
}
