//! Credential vault engine.
//!
//! This crate provides:
//! - The plaintext vault model (platform -> key name -> entry)
//! - Sessions that decrypt, mutate and persist a vault under a derived key
//! - A service that serializes writers per identity
//! - Platform metadata and environment variable export
//!
//! # Architecture
//! Sessions sit between the front ends and a [`keyvault_storage::BlobStore`],
//! handling key derivation and encryption transparently. Plaintext exists
//! only in memory while a session is open.

pub mod env;
pub mod model;
pub mod platforms;
pub mod service;
pub mod session;

pub use env::{environment_for, render_exports, ExportFormat};
pub use model::{EntrySummary, Listing, Meta, Mutation, Vault, VaultEntry};
pub use platforms::{PlatformConfig, PlatformRegistry};
pub use service::{ServiceConfig, VaultService, VaultStatus};
pub use session::{SessionState, VaultSession};
