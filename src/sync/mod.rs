pub mod engine;
pub mod protocol;
pub mod transport;

pub use engine::{Subscription, SyncEngine};
pub use protocol::SocketMessage;
pub use transport::{ConnectionStatus, RemoteSink, Transport};

// Participant side of synchronization: the engine owns the in-memory
// document and its subscribers, and exactly one transport feeds it
// documents from the authoritative endpoint.
