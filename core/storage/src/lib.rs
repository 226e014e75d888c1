//! Blob store abstraction for KeyVault.
//!
//! The vault engine persists exactly three values per identity (salt,
//! encrypted vault, last-modified timestamp) and treats every backend as
//! an opaque key to bytes map. This module provides the trait and the
//! in-memory and local filesystem backends.
//!
//! # Design Principles
//! - Whole-value replace only: no partial updates
//! - Optimistic concurrency through opaque versions
//! - Backend failures surface as `Persistence`, version mismatches as `Conflict`

pub mod local;
pub mod memory;
pub mod store;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use store::{BlobStore, Version, Versioned};
