//! Blob store trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use keyvault_common::Result;

/// Opaque revision tag of a stored value, used for compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version(String);

impl Version {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored value together with its current version.
#[derive(Debug, Clone)]
pub struct Versioned {
    pub data: Vec<u8>,
    pub version: Version,
}

/// Key to bytes persistence backend.
///
/// Implementations must make `set` and `compare_and_set` atomic with
/// respect to readers: a reader sees either the old or the new value,
/// never a mix.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Read a value and its version.
    ///
    /// # Returns
    /// `None` if the key has never been written.
    ///
    /// # Errors
    /// - `Persistence` if the backend is unavailable
    async fn get_versioned(&self, key: &str) -> Result<Option<Versioned>>;

    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_versioned(key).await?.map(|v| v.data))
    }

    /// Replace a value unconditionally.
    ///
    /// # Errors
    /// - `Persistence` if the backend is unavailable
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<Version>;

    /// Replace a value only if its current version matches `expected`.
    ///
    /// `expected == None` requires the key to be absent.
    ///
    /// # Errors
    /// - `Conflict` if the current version differs from `expected`
    /// - `Persistence` if the backend is unavailable
    async fn compare_and_set(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Option<&Version>,
    ) -> Result<Version>;
}
