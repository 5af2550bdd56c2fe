//! Server-sent-events framing for the push channel.

use bytes::Bytes;
use tgdash_protocol::BroadcastEvent;

const ESTABLISHED: &str = "event: connection_established\ndata: Connected\n\n";
const KEEPALIVE: &str = ": keepalive\n\n";

/// One unit written to a push connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Sent once, right after a connection registers.
    Established,
    /// A serialized event payload.
    Data(String),
    /// Comment line that keeps intermediaries from timing out an idle stream.
    KeepAlive,
}

impl Frame {
    pub fn event(event: &BroadcastEvent) -> Result<Self, serde_json::Error> {
        serde_json::to_string(event).map(Self::Data)
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Self::Established => Bytes::from_static(ESTABLISHED.as_bytes()),
            Self::KeepAlive => Bytes::from_static(KEEPALIVE.as_bytes()),
            // Payloads are single-line JSON, so one `data:` field suffices.
            Self::Data(json) => Bytes::from(format!("data: {json}\n\n")),
        }
    }
}
