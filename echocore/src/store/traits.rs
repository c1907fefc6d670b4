use crate::store::error::Result;
use async_trait::async_trait;

/// Durable client-side key-value storage.
///
/// Implementations must make a completed `set` visible to every later `get`
/// on the same key. Retry policy, if any, belongs to the implementation.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}
