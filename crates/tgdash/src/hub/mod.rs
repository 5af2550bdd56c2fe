//! Broadcast hub for fanning webhook updates out to push connections.
//!
//! The hub owns the registry of open push channels. Producers (the webhook
//! ingress, the dev harness, the heartbeat task) call into it synchronously;
//! each connection's frames are handed to its [`EventSink`] without waiting.

pub mod frame;
pub mod hub;
pub mod sink;

pub use frame::Frame;
pub use hub::{BroadcastHub, BroadcastReport, DEFAULT_HEARTBEAT_INTERVAL};
pub use sink::{ChannelSink, EventSink, SinkError};
