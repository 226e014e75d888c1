//! Cryptographic primitives for KeyVault.
//!
//! This module provides:
//! - Key derivation using scrypt
//! - Authenticated encryption using AES-256-GCM with a 16-byte IV
//! - Secure key handling with automatic zeroization
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - A fresh random IV is drawn for every encryption

pub mod aead;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt, encrypt, EncryptedBlob, IV_SIZE, TAG_SIZE};
pub use kdf::{derive_key, KdfParams};
pub use keys::{DerivedKey, Salt, KEY_LENGTH, SALT_LENGTH};
