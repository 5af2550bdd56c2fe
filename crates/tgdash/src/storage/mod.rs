//! Client-side key-value storage.
//!
//! Holds the credential list and the message cache between runs. Provides a
//! trait-based abstraction with implementations for:
//! - Local filesystem storage (one JSON document per key)
//! - In-memory storage (tests)

mod error;
mod file;
mod memory;
mod traits;

pub use error::{KvError, KvResult};
pub use file::FileKeyValueStore;
pub use memory::MemoryKeyValueStore;
pub use traits::KeyValueStore;
