//! Common error types for KeyVault.

use thiserror::Error;

/// Top-level error type for KeyVault operations.
///
/// Messages never carry the master password, derived key material or
/// decrypted vault contents.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied malformed input (bad salt length, bad shape, empty name).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The vault could not be unlocked with the supplied password.
    ///
    /// Also covers corrupted or tampered vault blobs; the two cases are
    /// deliberately indistinguishable.
    #[error("Invalid credentials: wrong password")]
    InvalidCredentials,

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The blob store failed to read or write.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A concurrent writer replaced the blob since it was read.
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// AEAD tag verification failed.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Cryptographic operation failed for a reason other than authentication.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Encrypted blob is too short or not decodable.
    #[error("Malformed blob: {0}")]
    MalformedBlob(String),

    /// Operation not permitted in the current state.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Persistence(_) | Error::Conflict(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
