//! In-memory blob store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{BlobStore, Version, Versioned};
use keyvault_common::{Error, Result};

/// In-memory blob store.
///
/// Used by tests and by service deployments that front a shared process.
/// All data is lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Versioned>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while set, every write fails with `Persistence`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Persistence("Memory store unavailable".to_string()));
        }
        Ok(())
    }

    fn next_version() -> Version {
        Version::new(Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_versioned(&self, key: &str) -> Result<Option<Versioned>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<Version> {
        self.check_available()?;

        let version = Self::next_version();
        self.entries.write().await.insert(
            key.to_string(),
            Versioned {
                data: value,
                version: version.clone(),
            },
        );
        Ok(version)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Option<&Version>,
    ) -> Result<Version> {
        self.check_available()?;

        let mut entries = self.entries.write().await;
        let current = entries.get(key).map(|v| &v.version);
        if current != expected {
            return Err(Error::Conflict(format!("Stale version for key {}", key)));
        }

        let version = Self::next_version();
        entries.insert(
            key.to_string(),
            Versioned {
                data: value,
                version: version.clone(),
            },
        );
        Ok(version)
    }
}
