//! Key derivation using scrypt.
//!
//! scrypt is a memory-hard password hashing function; the default
//! parameters match the widely used N=16384, r=8, p=1 profile so vaults
//! stay readable by other implementations sharing the same store.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::keys::{DerivedKey, Salt, KEY_LENGTH};
use keyvault_common::{Error, Result};

/// Parameters for scrypt key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Base-2 logarithm of the CPU/memory cost N.
    pub log_n: u8,
    /// Block size.
    pub r: u32,
    /// Parallelization factor.
    pub p: u32,
}

impl KdfParams {
    /// Parameters used for every persisted vault (N=2^14, r=8, p=1, ~16 MiB).
    pub const fn interactive() -> Self {
        Self::with_cost(14)
    }

    /// Cheaper parameters for tests and constrained hosts.
    ///
    /// Vaults written with these are not readable with `interactive()`.
    pub const fn moderate() -> Self {
        Self::with_cost(10)
    }

    const fn with_cost(log_n: u8) -> Self {
        Self { log_n, r: 8, p: 1 }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a vault key from a password and salt using scrypt.
///
/// The same password, salt and parameters always yield the same key.
/// Invalid scrypt parameters are reported as `InvalidInput`.
///
/// CPU and memory bound; async callers should run it on a blocking thread.
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<DerivedKey> {
    let scrypt_params = scrypt::Params::new(params.log_n, params.r, params.p, KEY_LENGTH)
        .map_err(|e| Error::InvalidInput(format!("Invalid KDF parameters: {}", e)))?;

    let mut okm = [0u8; KEY_LENGTH];
    scrypt::scrypt(password, salt.as_bytes(), &scrypt_params, &mut okm)
        .map_err(|e| Error::InvalidInput(format!("Invalid KDF output length: {}", e)))?;

    let key = DerivedKey::from_bytes(okm);
    okm.zeroize();
    Ok(key)
}
