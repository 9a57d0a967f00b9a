//! Seam to the service messaging layer: registration, presence,
//! point-to-point and broadcast delivery.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::messages::{Address, Envelope, InstanceId};

pub mod local;
pub mod ws;

pub use local::{LocalDirectory, LocalHub};
pub use ws::WsDirectory;

/// A live instance as reported by a presence query.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: InstanceId,
    pub service: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("instance is not registered")]
    NotRegistered,

    #[error("instance is already registered as {0}")]
    AlreadyRegistered(InstanceId),

    #[error("no live instance {0}")]
    UnknownInstance(Address),

    #[error("{0} does not name a single instance")]
    NotAnInstance(Address),

    #[error("hub rejected the request: {0}")]
    Rejected(String),

    #[error("connection to the hub is closed")]
    Closed,

    #[error("no reply from the hub within {0:?}")]
    Timeout(Duration),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed hub frame: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Client side of the messaging layer, one per player process.
///
/// `recv` must be cancel safe: the player drops a pending `recv` whenever
/// a timer fires first.
#[allow(async_fn_in_trait)]
pub trait Directory {
    async fn register(&mut self, service: &str, version: &str)
        -> Result<InstanceId, DirectoryError>;

    fn instance_id(&self) -> Option<&InstanceId>;

    /// Live instances of `service`, this one included.
    async fn presence(&mut self, service: &str)
        -> Result<Vec<Instance>, DirectoryError>;

    /// Delivers to the single instance named by `message.to`.
    async fn send(&mut self, message: Envelope) -> Result<(), DirectoryError>;

    /// Delivers to every instance of the service named by `message.to`.
    async fn broadcast(&mut self, message: Envelope) -> Result<(), DirectoryError>;

    /// Next inbound message, `None` once the subscription has ended.
    async fn recv(&mut self) -> Option<Envelope>;

    async fn shutdown(&mut self) -> Result<(), DirectoryError>;
}
