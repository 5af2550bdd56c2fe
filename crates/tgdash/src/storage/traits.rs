//! Storage trait definitions.

use async_trait::async_trait;

use super::KvResult;

/// Durable string-valued key-value store.
///
/// Values are opaque to the store; callers serialize their own documents.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Missing keys yield `None`.
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> KvResult<()>;

    /// Remove a value. Missing keys are not an error.
    async fn remove(&self, key: &str) -> KvResult<()>;
}
