//! Multi-tenant vault service.
//!
//! Serializes read-modify-write cycles per identity with an async lease
//! while letting different identities proceed in parallel. Each call opens
//! a fresh session, performs one operation and closes it again; nothing is
//! cached decrypted between calls.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::env::environment_for;
use crate::model::{Listing, Meta, Mutation, VaultEntry};
use crate::platforms::PlatformRegistry;
use crate::session::VaultSession;
use keyvault_common::{Error, Identity, Password, Result};
use keyvault_crypto::KdfParams;
use keyvault_storage::BlobStore;

/// Tunables for the service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// KDF parameters used for every identity.
    pub kdf_params: KdfParams,
    /// How many times a mutation is retried after a write conflict.
    pub max_conflict_retries: u32,
    /// Pause between conflict retries.
    pub retry_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            kdf_params: KdfParams::default(),
            max_conflict_retries: 3,
            retry_delay: Duration::from_millis(50),
        }
    }
}

/// Stored-state summary that does not require the password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultStatus {
    pub exists: bool,
    pub last_modified: Option<String>,
}

/// Vault engine front end for request handlers.
pub struct VaultService {
    store: Arc<dyn BlobStore>,
    config: ServiceConfig,
    leases: Mutex<HashMap<Identity, Arc<Mutex<()>>>>,
}

impl VaultService {
    /// Create a service over a shared blob store.
    pub fn new(store: Arc<dyn BlobStore>, config: ServiceConfig) -> Self {
        Self {
            store,
            config,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Get the service configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Acquire the per-identity lease.
    ///
    /// The lease table lock is held only long enough to find the identity's
    /// mutex; waiting happens on that mutex alone.
    async fn lease(&self, identity: &Identity) -> OwnedMutexGuard<()> {
        let lock = {
            let mut leases = self.leases.lock().await;
            // Drop idle entries so the table tracks only active identities
            leases.retain(|id, lock| id == identity || Arc::strong_count(lock) > 1);
            leases
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Open a session under the identity lease.
    ///
    /// The caller owns the returned session exclusively; the lease is
    /// released once unlocking completes, so long-lived sessions rely on
    /// compare-and-set for write safety.
    pub async fn open(&self, identity: &Identity, password: &Password) -> Result<VaultSession> {
        let _lease = self.lease(identity).await;
        VaultSession::open(
            self.store.clone(),
            identity.clone(),
            password,
            self.config.kdf_params,
        )
        .await
    }

    /// Whether a vault exists for `identity`, and when it last changed.
    pub async fn status(&self, identity: &Identity) -> Result<VaultStatus> {
        let exists = self.store.get(&identity.vault_key()).await?.is_some();
        let last_modified = self
            .store
            .get(&identity.last_modified_key())
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        Ok(VaultStatus {
            exists,
            last_modified,
        })
    }

    /// List platforms and entry metadata.
    pub async fn list(&self, identity: &Identity, password: &Password) -> Result<Listing> {
        let _lease = self.lease(identity).await;
        let mut session = self.open_unleased(identity, password).await?;
        let listing = session.list();
        session.close();
        listing
    }

    /// Fetch one entry.
    pub async fn get(
        &self,
        identity: &Identity,
        password: &Password,
        platform: &str,
        key_name: &str,
    ) -> Result<VaultEntry> {
        let _lease = self.lease(identity).await;
        let mut session = self.open_unleased(identity, password).await?;
        let entry = session.get(platform, key_name).cloned();
        session.close();
        entry
    }

    /// Environment assignments for every key of a platform.
    pub async fn environment(
        &self,
        identity: &Identity,
        password: &Password,
        registry: &PlatformRegistry,
        platform: &str,
    ) -> Result<BTreeMap<String, String>> {
        let _lease = self.lease(identity).await;
        let mut session = self.open_unleased(identity, password).await?;
        let env = session
            .vault()
            .and_then(|vault| environment_for(vault, registry, platform));
        session.close();
        env
    }

    /// Insert or overwrite an entry.
    pub async fn add(
        &self,
        identity: &Identity,
        password: &Password,
        platform: &str,
        key_name: &str,
        value: impl Into<String>,
        meta: Meta,
    ) -> Result<()> {
        let mutation = Mutation::Add {
            platform: platform.to_string(),
            key_name: key_name.to_string(),
            value: value.into(),
            meta,
        };
        self.mutate(identity, password, mutation).await
    }

    /// Remove an entry.
    pub async fn remove(
        &self,
        identity: &Identity,
        password: &Password,
        platform: &str,
        key_name: &str,
    ) -> Result<()> {
        let mutation = Mutation::Remove {
            platform: platform.to_string(),
            key_name: key_name.to_string(),
        };
        self.mutate(identity, password, mutation).await
    }

    /// Run one open, apply, persist cycle under the identity lease.
    ///
    /// Conflicts can still occur when another process writes the same store;
    /// those are retried against the re-fetched vault.
    pub async fn mutate(
        &self,
        identity: &Identity,
        password: &Password,
        mutation: Mutation,
    ) -> Result<()> {
        let _lease = self.lease(identity).await;
        let mut session = self.open_unleased(identity, password).await?;

        let mut attempt = 0;
        let result = loop {
            match session.apply(mutation.clone()).await {
                Err(Error::Conflict(msg)) if attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    debug!(
                        "Retrying {} for {} after conflict (attempt {}): {}",
                        mutation.describe(),
                        identity,
                        attempt,
                        msg
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                other => break other,
            }
        };

        if let Err(ref e) = result {
            warn!("{} for {} failed: {}", mutation.describe(), identity, e);
        }
        session.close();
        result
    }

    async fn open_unleased(&self, identity: &Identity, password: &Password) -> Result<VaultSession> {
        VaultSession::open(
            self.store.clone(),
            identity.clone(),
            password,
            self.config.kdf_params,
        )
        .await
    }
}
