//! Common utilities and types shared across KeyVault modules.
//!
//! This module provides the error taxonomy used by every layer and the
//! small validated types (identities, passwords) that cross crate
//! boundaries.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Identity, Password};
