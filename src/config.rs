//! Configuration for the endpoint and for sync participants.
//!
//! Values come from an optional TOML file, then `SIGNAL_SYNC_*` environment
//! variables (a `.env` file is honoured) override them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::storage::{self, StateStore, StoreBackend};

const ENV_PREFIX: &str = "SIGNAL_SYNC_";

/// Which mechanism propagates changes to a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    #[default]
    Polling,
    PushSocket,
    PushStream,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Polling => "polling",
            TransportKind::PushSocket => "push-socket",
            TransportKind::PushStream => "push-stream",
        })
    }
}

impl FromStr for TransportKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" | "poll" => Ok(TransportKind::Polling),
            "push-socket" | "socket" | "websocket" | "ws" => Ok(TransportKind::PushSocket),
            "push-stream" | "stream" | "sse" => Ok(TransportKind::PushStream),
            other => Err(SyncError::Config(format!("unknown transport '{other}'"))),
        }
    }
}

/// Settings for one sync participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub transport: TransportKind,
    pub poll_interval_ms: u64,
    /// Base URL of the authoritative endpoint, including any base path.
    pub endpoint: String,
    /// Defaults to `ws(s)://<endpoint>/ws`.
    pub socket_url: Option<String>,
    /// Defaults to `<endpoint>/events`.
    pub stream_url: Option<String>,
    /// Generated when absent.
    pub client_id: Option<String>,
    pub persistence: StoreBackend,
    pub sqlite_path: PathBuf,
    pub reconnect_delay_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Polling,
            poll_interval_ms: 5_000,
            endpoint: "http://127.0.0.1:3000".to_string(),
            socket_url: None,
            stream_url: None,
            client_id: None,
            persistence: StoreBackend::DurableRemote,
            sqlite_path: PathBuf::from("signal-sync-client.db"),
            reconnect_delay_ms: 5_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl SyncConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_persistence(mut self, backend: StoreBackend) -> Self {
        self.persistence = backend;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    fn endpoint_base(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }

    pub fn socket_url(&self) -> String {
        if let Some(url) = &self.socket_url {
            return url.clone();
        }
        let base = self.endpoint_base();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}/ws")
    }

    pub fn stream_url(&self) -> String {
        self.stream_url
            .clone()
            .unwrap_or_else(|| format!("{}/events", self.endpoint_base()))
    }

    pub fn open_store(&self) -> Result<Arc<dyn StateStore>> {
        storage::open_store(
            self.persistence,
            &self.sqlite_path,
            Some(&self.endpoint),
            self.request_timeout(),
        )
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_var("TRANSPORT") {
            self.transport = v.parse()?;
        }
        if let Some(v) = env_var("POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_number("POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = env_var("ENDPOINT") {
            self.endpoint = v;
        }
        if let Some(v) = env_var("SOCKET_URL") {
            self.socket_url = Some(v);
        }
        if let Some(v) = env_var("STREAM_URL") {
            self.stream_url = Some(v);
        }
        if let Some(v) = env_var("CLIENT_ID") {
            self.client_id = Some(v);
        }
        if let Some(v) = env_var("CLIENT_PERSISTENCE") {
            self.persistence = v.parse()?;
        }
        if let Some(v) = env_var("RECONNECT_DELAY_MS") {
            self.reconnect_delay_ms = parse_number("RECONNECT_DELAY_MS", &v)?;
        }
        Ok(())
    }
}

/// Settings for the authoritative endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Prefix the routes are nested under, e.g. `/api`. Empty for the root.
    pub base_path: String,
    /// Reported by `/health`.
    pub environment: String,
    pub persistence: StoreBackend,
    pub sqlite_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            base_path: String::new(),
            environment: "development".to_string(),
            persistence: StoreBackend::Volatile,
            sqlite_path: PathBuf::from("signal-sync.db"),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn open_store(&self) -> Result<Arc<dyn StateStore>> {
        if self.persistence == StoreBackend::DurableRemote {
            return Err(SyncError::Config(
                "the endpoint must own its store: use volatile or sqlite persistence".into(),
            ));
        }
        storage::open_store(
            self.persistence,
            &self.sqlite_path,
            None,
            Duration::from_secs(10),
        )
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_var("HOST") {
            self.host = v;
        }
        if let Some(v) = env_var("PORT") {
            self.port = parse_number("PORT", &v)?;
        }
        if let Some(v) = env_var("BASE_PATH") {
            self.base_path = v;
        }
        if let Some(v) = env_var("ENV") {
            self.environment = v;
        }
        if let Some(v) = env_var("PERSISTENCE") {
            self.persistence = v.parse()?;
        }
        if let Some(v) = env_var("DB_PATH") {
            self.sqlite_path = PathBuf::from(v);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    /// Also write daily-rotated log files here.
    pub directory: Option<PathBuf>,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            ansi: true,
        }
    }
}

impl LogConfig {
    fn apply_env(&mut self) {
        if let Some(v) = env_var("LOG_LEVEL") {
            self.level = v;
        }
        if let Some(v) = env_var("LOG_DIR") {
            self.directory = Some(PathBuf::from(v));
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub client: SyncConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// Load from `path` (if given) and then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.server.apply_env()?;
        self.client.apply_env()?;
        self.logging.apply_env();
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| SyncError::Config(format!("{ENV_PREFIX}{key} must be a number, got '{raw}'")))
}
