//! Persistence adapters for the authoritative document.
//!
//! Every backend implements [`StateStore`]; the engine and the endpoint only
//! ever see `Arc<dyn StateStore>`, so backends swap without touching either.

pub mod db;
pub mod memory;
pub mod remote;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::state::StateDocument;

pub use db::SqliteStore;
pub use memory::MemoryStore;
pub use remote::RemoteStore;

/// Durable (or not) home of the single shared document.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// `Ok(None)` means nothing has been stored yet, which is not an error.
    async fn get_state(&self) -> Result<Option<StateDocument>>;

    /// Offer `doc` and return the document the backend now holds.
    ///
    /// Every backend applies the admission rule: when `doc` is not strictly
    /// newer than what is stored, nothing changes and the stored document is
    /// returned. The remote backend may also return a server-stamped copy.
    async fn save_state(&self, doc: &StateDocument) -> Result<StateDocument>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    /// In-process only, lost on restart
    #[default]
    Volatile,
    /// Single-row SQLite file
    Sqlite,
    /// Another instance's authoritative endpoint over HTTP
    DurableRemote,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreBackend::Volatile => "volatile",
            StoreBackend::Sqlite => "sqlite",
            StoreBackend::DurableRemote => "durable-remote",
        })
    }
}

impl FromStr for StoreBackend {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "volatile" | "memory" => Ok(StoreBackend::Volatile),
            "sqlite" => Ok(StoreBackend::Sqlite),
            "durable-remote" | "remote" => Ok(StoreBackend::DurableRemote),
            other => Err(SyncError::Config(format!("unknown persistence backend '{other}'"))),
        }
    }
}

/// Open the selected backend.
///
/// `endpoint` is the base URL of the authoritative endpoint and is only
/// consulted for [`StoreBackend::DurableRemote`].
pub fn open_store(
    backend: StoreBackend,
    sqlite_path: &Path,
    endpoint: Option<&str>,
    timeout: Duration,
) -> Result<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match backend {
        StoreBackend::Volatile => Arc::new(MemoryStore::new()),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(sqlite_path)?),
        StoreBackend::DurableRemote => {
            let endpoint = endpoint.ok_or_else(|| {
                SyncError::Config("durable-remote persistence needs an endpoint URL".into())
            })?;
            Arc::new(RemoteStore::new(endpoint, timeout)?)
        }
    };
    tracing::debug!(backend = store.name(), "opened state store");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_round_trip() {
        for backend in [
            StoreBackend::Volatile,
            StoreBackend::Sqlite,
            StoreBackend::DurableRemote,
        ] {
            assert_eq!(backend.to_string().parse::<StoreBackend>().unwrap(), backend);
        }
        assert!("postgres".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn remote_backend_requires_endpoint() {
        let result = open_store(
            StoreBackend::DurableRemote,
            Path::new("unused.db"),
            None,
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
