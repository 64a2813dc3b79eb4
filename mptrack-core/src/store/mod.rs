//! Durable key-value store
//!
//! The tracker persists its identity state through the [`KeyValueStore`]
//! contract: an async, string-keyed map with `get`/`set`/`remove`. Two
//! backends ship with the crate:
//!
//! - [`MemoryStore`]: process-local, used by tests and throwaway runs
//! - [`JsonFileStore`]: a single JSON object on disk, used by the CLI

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::Result;

/// Async string-keyed persistence
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key was never written or was removed
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;
}

/// The fixed set of keys the tracker reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    ClientId,
    SessionId,
    LastActive,
    FirstVisit,
    AttributionId,
    UserId,
}

impl StorageKey {
    /// Every key, in the order `status` output lists them
    pub const ALL: [StorageKey; 6] = [
        StorageKey::ClientId,
        StorageKey::SessionId,
        StorageKey::LastActive,
        StorageKey::FirstVisit,
        StorageKey::AttributionId,
        StorageKey::UserId,
    ];

    /// Key as written to the store
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::ClientId => "ga4_cid",
            StorageKey::SessionId => "ga4_sid",
            StorageKey::LastActive => "ga4_last_active",
            StorageKey::FirstVisit => "ga4_first_visit",
            StorageKey::AttributionId => "attribution_id",
            StorageKey::UserId => "ga4_uid",
        }
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
