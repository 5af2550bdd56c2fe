//! Output side of a push connection.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Why a frame could not be written to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The reading half of the connection is gone.
    #[error("connection closed")]
    Closed,

    /// The client is not draining frames fast enough.
    #[error("send buffer full")]
    Full,

    #[error("write failed: {0}")]
    Other(String),
}

/// Write-capable handle to one connection's framed byte stream.
///
/// `send` must not block and must not call back into the hub.
pub trait EventSink: Send + Sync {
    fn send(&self, frame: Bytes) -> Result<(), SinkError>;
}

/// Sink backed by a bounded channel whose receiver feeds an HTTP response body.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn send(&self, frame: Bytes) -> Result<(), SinkError> {
        self.tx.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}
