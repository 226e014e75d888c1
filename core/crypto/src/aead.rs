//! Authenticated encryption using AES-256-GCM.
//!
//! The vault blob layout is `IV(16) || Tag(16) || Ciphertext`. GCM with a
//! 16-byte IV derives its counter block through GHASH, which keeps the
//! format compatible with other implementations writing the same store.

use aes_gcm::{
    aead::{consts::U16, generic_array::GenericArray, AeadInPlace, KeyInit},
    aes::Aes256,
    AesGcm,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};

use crate::keys::DerivedKey;
use keyvault_common::{Error, Result};

/// IV size (16 bytes).
pub const IV_SIZE: usize = 16;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// AES-256-GCM instantiated with a 128-bit IV.
type VaultCipher = AesGcm<Aes256, U16>;

/// At-rest representation of an encrypted vault: `IV || Tag || Ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob(Vec<u8>);

impl EncryptedBlob {
    /// Wrap raw blob bytes read from a store.
    ///
    /// # Errors
    /// - `MalformedBlob` if the data cannot hold an IV and a tag
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < IV_SIZE + TAG_SIZE {
            return Err(Error::MalformedBlob(format!(
                "Blob too short: expected at least {} bytes, got {}",
                IV_SIZE + TAG_SIZE,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Decode a base64 blob received over a textual transport.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::MalformedBlob(format!("Invalid base64: {}", e)))?;
        Self::from_bytes(bytes)
    }

    /// Encode for textual transports.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn iv(&self) -> &[u8] {
        &self.0[..IV_SIZE]
    }

    pub fn tag(&self) -> &[u8] {
        &self.0[IV_SIZE..IV_SIZE + TAG_SIZE]
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.0[IV_SIZE + TAG_SIZE..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Encrypt plaintext under a derived key.
///
/// # Postconditions
/// - Returns IV || tag || ciphertext
/// - The IV is freshly random for every call
/// - No associated data is authenticated
///
/// # Errors
/// - `Crypto` only if the plaintext exceeds the GCM length limit
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> Result<EncryptedBlob> {
    let cipher = VaultCipher::new(GenericArray::from_slice(key.as_bytes()));

    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
        .map_err(|_| Error::Crypto("Plaintext too large to encrypt".to_string()))?;

    let mut blob = Vec::with_capacity(IV_SIZE + TAG_SIZE + buffer.len());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&tag);
    blob.extend_from_slice(&buffer);

    Ok(EncryptedBlob(blob))
}

/// Decrypt a blob under a derived key.
///
/// # Errors
/// - `AuthenticationFailed` if the tag does not verify (wrong key or
///   tampered data; the two are indistinguishable by design of GCM)
pub fn decrypt(key: &DerivedKey, blob: &EncryptedBlob) -> Result<Vec<u8>> {
    let cipher = VaultCipher::new(GenericArray::from_slice(key.as_bytes()));

    let mut buffer = blob.ciphertext().to_vec();
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(blob.iv()),
            b"",
            &mut buffer,
            GenericArray::from_slice(blob.tag()),
        )
        .map_err(|_| Error::AuthenticationFailed)?;

    Ok(buffer)
}
