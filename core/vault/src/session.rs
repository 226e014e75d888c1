//! Vault session management.
//!
//! A session unlocks one identity's vault, holds the derived key and the
//! decrypted vault for the duration of one logical operation, and persists
//! every mutation before reporting success. Keys and plaintext are
//! zeroized when the session is closed or dropped.

use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::model::{now_iso8601, Listing, Meta, Mutation, Vault, VaultEntry};
use keyvault_common::{Error, Identity, Password, Result};
use keyvault_crypto::{decrypt, derive_key, encrypt, DerivedKey, EncryptedBlob, KdfParams, Salt};
use keyvault_storage::{BlobStore, Version};

/// State of the vault session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Vault is decrypted and mutations are accepted.
    Ready,
    /// Key and plaintext have been discarded.
    Closed,
}

/// Unlocked vault bound to one identity.
pub struct VaultSession {
    identity: Identity,
    store: Arc<dyn BlobStore>,
    /// Derived key (zeroized on drop).
    key: Option<DerivedKey>,
    /// Decrypted vault (entries zeroized on drop).
    vault: Option<Vault>,
    /// Version of the vault blob this session last read or wrote.
    version: Option<Version>,
    state: SessionState,
}

impl VaultSession {
    /// Unlock the vault for `identity`, creating it if none exists.
    ///
    /// # Postconditions
    /// - A salt exists in the store for `identity`
    /// - A vault blob exists in the store for `identity`
    /// - The session is `Ready`
    ///
    /// # Errors
    /// - `InvalidCredentials` if the stored blob does not decrypt under the
    ///   derived key (wrong password, or a corrupted blob)
    /// - `InvalidInput` if the stored salt or decrypted document is malformed
    /// - `NotFound` if a vault blob exists without its salt
    /// - `Persistence` if the store is unavailable
    pub async fn open(
        store: Arc<dyn BlobStore>,
        identity: Identity,
        password: &Password,
        params: KdfParams,
    ) -> Result<Self> {
        let salt = load_or_create_salt(store.as_ref(), &identity).await?;
        let key = derive_on_blocking_thread(password, salt, params).await?;

        let vault_key = identity.vault_key();
        let (vault, version) = match store.get_versioned(&vault_key).await? {
            Some(existing) => {
                let vault = decrypt_vault(&key, existing.data).inspect_err(|_| {
                    warn!("Unlock failed for {}", identity);
                })?;
                debug!("Unlocked vault for {}", identity);
                (vault, existing.version)
            }
            None => {
                let vault = Vault::new();
                let blob = encrypt_vault(&key, &vault)?;
                match store
                    .compare_and_set(&vault_key, blob.into_bytes(), None)
                    .await
                {
                    Ok(version) => {
                        info!("Created vault for {}", identity);
                        touch_last_modified(store.as_ref(), &identity).await;
                        (vault, version)
                    }
                    Err(Error::Conflict(_)) => {
                        // Another opener created the vault first; unlock theirs.
                        let existing = store.get_versioned(&vault_key).await?.ok_or_else(|| {
                            Error::Persistence(format!("Vault for {} vanished", identity))
                        })?;
                        (decrypt_vault(&key, existing.data)?, existing.version)
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        Ok(Self {
            identity,
            store,
            key: Some(key),
            vault: Some(vault),
            version: Some(version),
            state: SessionState::Ready,
        })
    }

    /// Identity this session is bound to.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Get the current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if session is ready.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Read access to the decrypted vault.
    ///
    /// # Errors
    /// - `NotPermitted` if the session is closed
    pub fn vault(&self) -> Result<&Vault> {
        match (self.state, self.vault.as_ref()) {
            (SessionState::Ready, Some(vault)) => Ok(vault),
            _ => Err(Error::NotPermitted("Session is closed".to_string())),
        }
    }

    /// List platforms and entry metadata; secret values are omitted.
    pub fn list(&self) -> Result<Listing> {
        Ok(self.vault()?.list())
    }

    /// Look up one entry.
    pub fn get(&self, platform: &str, key_name: &str) -> Result<&VaultEntry> {
        self.vault()?.get(platform, key_name)
    }

    /// Insert or overwrite an entry and persist the vault.
    pub async fn add(
        &mut self,
        platform: &str,
        key_name: &str,
        value: impl Into<String>,
        meta: Meta,
    ) -> Result<()> {
        self.apply(Mutation::Add {
            platform: platform.to_string(),
            key_name: key_name.to_string(),
            value: value.into(),
            meta,
        })
        .await
    }

    /// Remove an entry and persist the vault.
    pub async fn remove(&mut self, platform: &str, key_name: &str) -> Result<()> {
        self.apply(Mutation::Remove {
            platform: platform.to_string(),
            key_name: key_name.to_string(),
        })
        .await
    }

    /// Apply one mutation and persist the re-encrypted vault.
    ///
    /// # Postconditions
    /// - On success the store holds the mutated vault under a fresh IV
    /// - On failure, or if the future is dropped before the store answers,
    ///   the in-memory vault equals its pre-mutation value
    ///
    /// # Errors
    /// - `NotPermitted` if the session is closed
    /// - `NotFound` / `InvalidInput` from the model operation
    /// - `Conflict` if another writer replaced the blob; the session has
    ///   re-fetched the latest vault and the caller may retry
    /// - `Persistence` if the store rejected the write
    pub async fn apply(&mut self, mutation: Mutation) -> Result<()> {
        let description = mutation.describe();
        let mut next = self.vault()?.clone();
        next.apply(mutation)?;

        // Swap in only once the store has the new blob; a cancelled write
        // leaves the session at the last persisted state.
        match self.persist(&next).await {
            Ok(version) => {
                self.vault = Some(next);
                self.version = Some(version);
                touch_last_modified(self.store.as_ref(), &self.identity).await;
                debug!("Applied {} for {}", description, self.identity);
                Ok(())
            }
            Err(err) => {
                warn!("Failed to persist {} for {}: {}", description, self.identity, err);
                if matches!(err, Error::Conflict(_)) {
                    if let Err(reload_err) = self.reload().await {
                        warn!("Reload after conflict failed for {}: {}", self.identity, reload_err);
                    }
                }
                Err(err)
            }
        }
    }

    /// Re-fetch the vault blob from the store and decrypt it with the
    /// session key.
    ///
    /// # Errors
    /// - `NotPermitted` if the session is closed
    /// - `NotFound` if the vault blob no longer exists
    /// - `InvalidCredentials` if the stored blob no longer decrypts
    pub async fn reload(&mut self) -> Result<()> {
        let key = match (self.state, self.key.as_ref()) {
            (SessionState::Ready, Some(key)) => key,
            _ => return Err(Error::NotPermitted("Session is closed".to_string())),
        };

        let existing = self
            .store
            .get_versioned(&self.identity.vault_key())
            .await?
            .ok_or_else(|| Error::NotFound(format!("Vault for {} not found", self.identity)))?;

        let vault = decrypt_vault(key, existing.data)?;
        self.vault = Some(vault);
        self.version = Some(existing.version);
        debug!("Reloaded vault for {}", self.identity);
        Ok(())
    }

    /// Discard the derived key and plaintext vault.
    ///
    /// Idempotent.
    pub fn close(&mut self) {
        // Both types zeroize on drop
        self.key.take();
        self.vault.take();
        self.version = None;
        if self.state != SessionState::Closed {
            debug!("Closed session for {}", self.identity);
        }
        self.state = SessionState::Closed;
    }

    async fn persist(&self, vault: &Vault) -> Result<Version> {
        let key = match (self.state, self.key.as_ref()) {
            (SessionState::Ready, Some(key)) => key,
            _ => return Err(Error::NotPermitted("Session is closed".to_string())),
        };

        let blob = encrypt_vault(key, vault)?;
        self.store
            .compare_and_set(
                &self.identity.vault_key(),
                blob.into_bytes(),
                self.version.as_ref(),
            )
            .await
    }
}

impl Drop for VaultSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read the identity's salt, creating one on first use.
///
/// A salt is never generated for a vault blob that already exists, since
/// that blob could then never be decrypted again.
async fn load_or_create_salt(store: &dyn BlobStore, identity: &Identity) -> Result<Salt> {
    let salt_key = identity.salt_key();
    if let Some(bytes) = store.get(&salt_key).await? {
        return Salt::from_slice(&bytes);
    }

    if store.get(&identity.vault_key()).await?.is_some() {
        return Err(Error::NotFound(format!(
            "Salt for existing vault of {} not found",
            identity
        )));
    }

    let salt = Salt::generate();
    match store
        .compare_and_set(&salt_key, salt.as_bytes().to_vec(), None)
        .await
    {
        Ok(_) => {
            debug!("Generated salt for {}", identity);
            Ok(salt)
        }
        Err(Error::Conflict(_)) => {
            let bytes = store.get(&salt_key).await?.ok_or_else(|| {
                Error::Persistence(format!("Salt for {} vanished", identity))
            })?;
            Salt::from_slice(&bytes)
        }
        Err(e) => Err(e),
    }
}

/// Run the memory-hard derivation off the async worker threads so other
/// identities keep making progress.
async fn derive_on_blocking_thread(
    password: &Password,
    salt: Salt,
    params: KdfParams,
) -> Result<DerivedKey> {
    let password = password.clone();
    tokio::task::spawn_blocking(move || derive_key(password.as_bytes(), &salt, &params))
        .await
        .map_err(|e| Error::Crypto(format!("Key derivation task failed: {}", e)))?
}

fn encrypt_vault(key: &DerivedKey, vault: &Vault) -> Result<EncryptedBlob> {
    let plaintext = Zeroizing::new(vault.to_json()?);
    encrypt(key, &plaintext)
}

/// Decrypt and parse a stored vault blob.
///
/// Cipher-level failures collapse into `InvalidCredentials` so callers
/// cannot tell a wrong password from a corrupted blob.
fn decrypt_vault(key: &DerivedKey, data: Vec<u8>) -> Result<Vault> {
    let plaintext = EncryptedBlob::from_bytes(data)
        .and_then(|blob| decrypt(key, &blob))
        .map_err(|e| match e {
            Error::AuthenticationFailed | Error::MalformedBlob(_) => Error::InvalidCredentials,
            other => other,
        })?;
    let plaintext = Zeroizing::new(plaintext);
    Vault::from_json(&plaintext)
}

async fn touch_last_modified(store: &dyn BlobStore, identity: &Identity) {
    let stamp = now_iso8601().into_bytes();
    if let Err(e) = store.set(&identity.last_modified_key(), stamp).await {
        warn!("Failed to update last-modified for {}: {}", identity, e);
    }
}
