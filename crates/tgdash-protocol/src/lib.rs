//! Wire types shared by the tgdash server and its clients.
//!
//! The server produces [`BroadcastEvent`]s on the push channel; clients decode
//! them with [`decode_event`] and merge the carried [`NormalizedMessage`]s into
//! their local message log, keyed by [`MessageKey`].

pub mod events;
pub mod messages;

pub use events::{
    BroadcastEvent, GenericUpdatePayload, HeartbeatPayload, NewMessagePayload, decode_event,
};
pub use messages::{
    Chat, ChatType, Document, MessageKey, NormalizedMessage, PhotoSize, User, Video,
};
