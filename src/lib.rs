//! # Signal Sync - shared state for traffic-signal controllers
//!
//! Keeps one configuration document (signal colors, time zones, priorities,
//! control mode, board addresses) consistent across every panel, dashboard
//! and controller that edits or displays it.
//!
//! ## Features
//!
//! - **Last-writer-wins**: a write is admitted only if its `lastUpdated` is
//!   strictly newer than the stored one
//! - **Pluggable persistence**: volatile, SQLite, or another endpoint over HTTP
//! - **Three transports**: polling, WebSocket push, server-sent events
//! - **Authoritative endpoint**: `GET`/`POST /state`, `/health`, `/ws`, `/events`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use signal_sync::{ControlMode, StatePatch, SyncConfig, SyncEngine, TransportKind};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SyncConfig::new("http://127.0.0.1:3000")
//!         .with_transport(TransportKind::PushSocket);
//!     let engine = SyncEngine::from_config(config)?;
//!
//!     let _sub = engine.subscribe(|doc| {
//!         println!("mode is now {:?} ({})", doc.control_mode, doc.last_updated);
//!     });
//!     engine.start().await?;
//!
//!     engine.publish(StatePatch::control_mode(ControlMode::Manual)).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod server;
pub mod state;
pub mod storage;
pub mod sync;

// Re-export main types for library consumers
pub use config::{AppConfig, LogConfig, ServerConfig, SyncConfig, TransportKind};
pub use dispatch::{CommandDispatcher, DeviceCommand, LoggingDispatcher};
pub use error::{Result, RetryPolicy, SyncError};
pub use state::{
    Admission, ControlMode, PoleTiming, Priority, SignalColor, StateDocument, StatePatch,
    TimeOfDay, TimeZone,
};
pub use storage::{MemoryStore, RemoteStore, SqliteStore, StateStore, StoreBackend};
pub use sync::{ConnectionStatus, Subscription, SyncEngine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
