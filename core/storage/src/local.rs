//! Local filesystem blob store.

use async_trait::async_trait;
use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::store::{BlobStore, Version, Versioned};
use keyvault_common::{Error, Result};

/// Local filesystem blob store.
///
/// Each key is one file under the root directory. Writes go to a temporary
/// sibling file that is fsynced and renamed over the target, so readers
/// never observe a partially written blob. Files are created owner
/// read/write only.
pub struct LocalStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Create a new local store rooted at the given directory.
    ///
    /// # Postconditions
    /// - Root directory is created (mode 0700 on Unix) if it doesn't exist
    ///
    /// # Errors
    /// - `Persistence` if the directory cannot be created
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            create_private_dir(&root).map_err(|e| {
                Error::Persistence(format!(
                    "Cannot create store directory {}: {}",
                    root.display(),
                    e
                ))
            })?;
        }

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a store key to a file path.
    ///
    /// `alice:vault` becomes `<root>/alice.vault`.
    fn to_fs_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(Error::InvalidInput(format!("Invalid store key: {:?}", key)));
        }
        Ok(self.root.join(key.replace(':', ".")))
    }

    fn version_of(data: &[u8]) -> Version {
        let digest = Blake2b::<U16>::digest(data);
        let tag: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Version::new(tag)
    }

    async fn read(&self, path: &Path) -> Result<Option<Versioned>> {
        match fs::read(path).await {
            Ok(data) => {
                let version = Self::version_of(&data);
                Ok(Some(Versioned { data, version }))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Persistence(format!(
                "Cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("blob");
        let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let result = async {
            let mut options = fs::OpenOptions::new();
            options.write(true).create_new(true);
            #[cfg(unix)]
            options.mode(0o600);

            let mut file = options.open(&tmp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);

            fs::rename(&tmp_path, path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::Persistence(format!(
                "Cannot write {}: {}",
                path.display(),
                e
            )));
        }

        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

#[async_trait]
impl BlobStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn get_versioned(&self, key: &str) -> Result<Option<Versioned>> {
        let path = self.to_fs_path(key)?;
        self.read(&path).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<Version> {
        let path = self.to_fs_path(key)?;
        let _guard = self.write_lock.lock().await;

        self.write_atomic(&path, &value).await?;
        Ok(Self::version_of(&value))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Option<&Version>,
    ) -> Result<Version> {
        let path = self.to_fs_path(key)?;
        let _guard = self.write_lock.lock().await;

        let current = self.read(&path).await?.map(|v| v.version);
        if current.as_ref() != expected {
            return Err(Error::Conflict(format!("Stale version for key {}", key)));
        }

        self.write_atomic(&path, &value).await?;
        Ok(Self::version_of(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyvault_common::Identity;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_accepts_every_valid_identity() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path()).unwrap();

        for name in ["alice", "a.b", "user@example.com", "x-1_y"] {
            let identity = Identity::new(name).unwrap();
            for key in [
                identity.salt_key(),
                identity.vault_key(),
                identity.last_modified_key(),
            ] {
                store.set(&key, b"x".to_vec()).await.unwrap();
            }
        }
        assert!(Identity::new(".hidden").is_err());
    }

    #[tokio::test]
    async fn test_local_set_get() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path()).unwrap();
        let data = b"Hello, Local!".to_vec();

        store.set("alice:vault", data.clone()).await.unwrap();

        assert_eq!(store.get("alice:vault").await.unwrap(), Some(data));
        assert!(temp.path().join("alice.vault").exists());
    }

    #[tokio::test]
    async fn test_local_missing_key() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path()).unwrap();

        assert!(store.get("alice:salt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_creates_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("nested").join("store");

        let store = LocalStore::new(&root).unwrap();
        store.set("k", vec![1]).await.unwrap();

        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_local_rejects_bad_keys() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path()).unwrap();

        assert!(matches!(
            store.set("../escape", vec![1]).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            store.get("a/b").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_local_compare_and_set() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path()).unwrap();

        let v1 = store.compare_and_set("k", vec![1], None).await.unwrap();
        assert!(matches!(
            store.compare_and_set("k", vec![2], None).await,
            Err(Error::Conflict(_))
        ));

        let v2 = store.compare_and_set("k", vec![2], Some(&v1)).await.unwrap();
        assert_ne!(v1, v2);
        assert!(matches!(
            store.compare_and_set("k", vec![3], Some(&v1)).await,
            Err(Error::Conflict(_))
        ));
        assert_eq!(store.get("k").await.unwrap(), Some(vec![2]));
    }

    #[tokio::test]
    async fn test_local_no_temp_files_left() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path()).unwrap();

        store.set("alice:vault", vec![1, 2, 3]).await.unwrap();
        store.set("alice:vault", vec![4, 5, 6]).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["alice.vault".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path()).unwrap();
        store.set("alice:vault", vec![1]).await.unwrap();

        let mode = std::fs::metadata(temp.path().join("alice.vault"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
