//! Durable-remote store
//!
//! Reaches another instance's authoritative endpoint over its HTTP contract:
//! `GET {endpoint}/state` and `POST {endpoint}/state`. Durability and the
//! admission rule live on the other side; this adapter only transports.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::StateStore;
use crate::error::{Result, SyncError};
use crate::state::StateDocument;

const BACKEND: &str = "durable-remote";

/// Body returned by `POST /state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {
    pub success: bool,
    pub state: StateDocument,
}

pub struct RemoteStore {
    client: Client,
    state_url: String,
}

impl RemoteStore {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let base = url::Url::parse(endpoint)
            .map_err(|e| SyncError::Config(format!("invalid endpoint url '{endpoint}': {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            state_url: format!("{}/state", base.as_str().trim_end_matches('/')),
        })
    }

    pub fn state_url(&self) -> &str {
        &self.state_url
    }
}

/// The endpoint answers `{}` when nothing is stored yet.
fn decode_state(value: serde_json::Value) -> Result<Option<StateDocument>> {
    match value {
        serde_json::Value::Object(ref map) if map.is_empty() => Ok(None),
        serde_json::Value::Null => Ok(None),
        other => serde_json::from_value(other)
            .map(Some)
            .map_err(|e| SyncError::persistence(BACKEND, format!("unexpected state body: {e}"))),
    }
}

#[async_trait]
impl StateStore for RemoteStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn get_state(&self) -> Result<Option<StateDocument>> {
        let response = self
            .client
            .get(&self.state_url)
            .send()
            .await
            .map_err(|e| SyncError::persistence(BACKEND, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::persistence(
                BACKEND,
                format!("GET state failed: {status} - {body}"),
            ));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SyncError::persistence(BACKEND, e))?;
        decode_state(value)
    }

    async fn save_state(&self, doc: &StateDocument) -> Result<StateDocument> {
        let response = self
            .client
            .post(&self.state_url)
            .json(doc)
            .send()
            .await
            .map_err(|e| SyncError::persistence(BACKEND, e))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::MalformedInput(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::persistence(
                BACKEND,
                format!("POST state failed: {status} - {body}"),
            ));
        }

        let written: WriteResponse = response
            .json()
            .await
            .map_err(|e| SyncError::persistence(BACKEND, e))?;
        Ok(written.state)
    }
}
