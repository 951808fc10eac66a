#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use signal_sync::config::ServerConfig;
use signal_sync::server::{self, AppState};
use signal_sync::{StateDocument, StateStore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

pub fn reserve_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

pub fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

/// Serve `store` on `port` and wait until `/health` answers.
pub async fn spawn_endpoint(port: u16, store: Arc<dyn StateStore>) -> Result<JoinHandle<()>> {
    let handle = tokio::spawn(serve_on(port, store));
    if let Err(err) = wait_healthy(port).await {
        handle.abort();
        return Err(err);
    }
    Ok(handle)
}

/// Endpoint on its own runtime. Shutting it down drops every open
/// connection too, which aborting the serve task alone does not.
pub struct Endpoint {
    runtime: Option<tokio::runtime::Runtime>,
}

impl Endpoint {
    pub async fn start(port: u16, store: Arc<dyn StateStore>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        runtime.spawn(serve_on(port, store));

        let endpoint = Self {
            runtime: Some(runtime),
        };
        wait_healthy(port).await?;
        Ok(endpoint)
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(runtime) = self.runtime.take() {
            tokio::task::spawn_blocking(move || runtime.shutdown_timeout(Duration::from_secs(2)))
                .await?;
        }
        Ok(())
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn serve_on(port: u16, store: Arc<dyn StateStore>) {
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port,
        environment: "test".into(),
        ..Default::default()
    };
    let state = AppState::new(store, "test");
    let _ = server::serve(config, state).await;
}

async fn wait_healthy(port: u16) -> Result<()> {
    let client = reqwest::Client::new();
    let health = format!("{}/health", base_url(port));
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Ok(response) = client.get(&health).send().await {
            if response.status().is_success() {
                return Ok(());
            }
        }
        sleep(Duration::from_millis(25)).await;
    }
    Err(anyhow!("endpoint on port {port} never became healthy"))
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn eventually<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub fn document(mode: signal_sync::ControlMode, stamp: i64) -> StateDocument {
    let mut doc = StateDocument::default();
    doc.control_mode = mode;
    doc.last_updated = stamp;
    doc.last_updated_by = "test".into();
    doc
}

pub async fn post_state(port: u16, body: &serde_json::Value) -> Result<(u16, serde_json::Value)> {
    let response = reqwest::Client::new()
        .post(format!("{}/state", base_url(port)))
        .json(body)
        .send()
        .await?;
    let status = response.status().as_u16();
    let body = response.json().await?;
    Ok((status, body))
}

pub async fn get_state(port: u16) -> Result<serde_json::Value> {
    let body = reqwest::get(format!("{}/state", base_url(port)))
        .await?
        .json()
        .await?;
    Ok(body)
}

pub async fn post_raw(port: u16, body: &'static str) -> Result<u16> {
    let response = reqwest::Client::new()
        .post(format!("{}/state", base_url(port)))
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await?;
    Ok(response.status().as_u16())
}
