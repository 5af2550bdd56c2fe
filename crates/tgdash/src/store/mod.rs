//! Client reconciliation store.

pub mod clock;
mod message_store;
mod persist;
pub mod retention;

pub use clock::{Clock, ManualClock, SystemClock};
pub use message_store::{MESSAGES_KEY, MessageStore, StoreOptions};
pub use persist::{DEFAULT_DEBOUNCE, DebouncedWriter};
pub use retention::{DEFAULT_MAX_AGE, DEFAULT_MAX_ITEMS, RetentionPolicy, StoredMessage};
