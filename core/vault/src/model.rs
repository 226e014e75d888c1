//! In-memory credential model.
//!
//! A vault maps platform -> key name -> entry. Serialization of this
//! structure is the plaintext that gets encrypted, so its JSON shape is a
//! compatibility contract:
//!
//! ```json
//! {"github":{"token":{"value":"ghp_x","added":"2024-01-01T00:00:00.000Z","meta":{}}}}
//! ```

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::{Zeroize, ZeroizeOnDrop};

use keyvault_common::{Error, Result};

/// Free-form provenance attached to an entry.
pub type Meta = BTreeMap<String, String>;

/// Public view of a vault: platform -> entries without secret values.
pub type Listing = BTreeMap<String, Vec<EntrySummary>>;

/// One stored credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct VaultEntry {
    pub value: String,
    /// ISO-8601 UTC timestamp of the last write.
    #[zeroize(skip)]
    pub added: String,
    #[serde(default)]
    #[zeroize(skip)]
    pub meta: Meta,
}

impl VaultEntry {
    /// Create an entry stamped with the current time.
    pub fn new(value: impl Into<String>, meta: Meta) -> Self {
        Self {
            value: value.into(),
            added: now_iso8601(),
            meta,
        }
    }
}

impl std::fmt::Debug for VaultEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultEntry")
            .field("value", &"[REDACTED]")
            .field("added", &self.added)
            .field("meta", &self.meta)
            .finish()
    }
}

/// Entry metadata returned by `list`; never carries the secret value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub name: String,
    pub added: String,
    pub meta: Meta,
}

/// A single state change applied by a session.
#[derive(Clone)]
pub enum Mutation {
    /// Insert or overwrite an entry.
    Add {
        platform: String,
        key_name: String,
        value: String,
        meta: Meta,
    },
    /// Delete an entry, pruning the platform if it becomes empty.
    Remove { platform: String, key_name: String },
}

impl Mutation {
    /// Human-readable operation label for logs (no secret values).
    pub fn describe(&self) -> String {
        match self {
            Mutation::Add {
                platform, key_name, ..
            } => format!("add {}/{}", platform, key_name),
            Mutation::Remove { platform, key_name } => {
                format!("remove {}/{}", platform, key_name)
            }
        }
    }
}

impl std::fmt::Debug for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mutation({})", self.describe())
    }
}

/// Decrypted credential store.
///
/// Invariant: no platform maps to an empty set of keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Vault {
    platforms: BTreeMap<String, BTreeMap<String, VaultEntry>>,
}

impl Vault {
    /// Create an empty vault.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    /// Platform identifiers currently present.
    pub fn platforms(&self) -> impl Iterator<Item = &str> {
        self.platforms.keys().map(String::as_str)
    }

    /// All entries of one platform.
    ///
    /// # Errors
    /// - `NotFound` if the platform has no entries
    pub fn entries(&self, platform: &str) -> Result<&BTreeMap<String, VaultEntry>> {
        self.platforms
            .get(platform)
            .ok_or_else(|| Error::NotFound(format!("Platform not found: {}", platform)))
    }

    /// List every platform with its entry names and metadata.
    pub fn list(&self) -> Listing {
        self.platforms
            .iter()
            .map(|(platform, keys)| {
                let summaries = keys
                    .iter()
                    .map(|(name, entry)| EntrySummary {
                        name: name.clone(),
                        added: entry.added.clone(),
                        meta: entry.meta.clone(),
                    })
                    .collect();
                (platform.clone(), summaries)
            })
            .collect()
    }

    /// Look up one entry.
    ///
    /// # Errors
    /// - `NotFound` if the platform or key name is absent
    pub fn get(&self, platform: &str, key_name: &str) -> Result<&VaultEntry> {
        self.entries(platform)?.get(key_name).ok_or_else(|| {
            Error::NotFound(format!("Key not found: {}/{}", platform, key_name))
        })
    }

    /// Insert or overwrite an entry, stamping it with the current time.
    ///
    /// # Errors
    /// - `InvalidInput` if platform or key name is empty
    pub fn add(
        &mut self,
        platform: &str,
        key_name: &str,
        value: impl Into<String>,
        meta: Meta,
    ) -> Result<()> {
        validate_name("Platform", platform)?;
        validate_name("Key name", key_name)?;

        self.platforms
            .entry(platform.to_string())
            .or_default()
            .insert(key_name.to_string(), VaultEntry::new(value, meta));
        Ok(())
    }

    /// Remove an entry and prune its platform if it becomes empty.
    ///
    /// # Errors
    /// - `NotFound` if the platform or key name is absent
    pub fn remove(&mut self, platform: &str, key_name: &str) -> Result<VaultEntry> {
        let keys = self
            .platforms
            .get_mut(platform)
            .ok_or_else(|| Error::NotFound(format!("Platform not found: {}", platform)))?;

        let removed = keys.remove(key_name).ok_or_else(|| {
            Error::NotFound(format!("Key not found: {}/{}", platform, key_name))
        })?;

        if keys.is_empty() {
            self.platforms.remove(platform);
        }
        Ok(removed)
    }

    /// Apply a mutation in place.
    pub fn apply(&mut self, mutation: Mutation) -> Result<()> {
        match mutation {
            Mutation::Add {
                platform,
                key_name,
                value,
                meta,
            } => self.add(&platform, &key_name, value, meta),
            Mutation::Remove { platform, key_name } => {
                self.remove(&platform, &key_name).map(|_| ())
            }
        }
    }

    /// Serialize to the JSON plaintext that gets encrypted.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse decrypted JSON plaintext.
    ///
    /// # Errors
    /// - `InvalidInput` if the document does not have the vault shape or
    ///   contains an empty platform mapping
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let platforms: BTreeMap<String, BTreeMap<String, VaultEntry>> =
            serde_json::from_slice(bytes)
                .map_err(|e| Error::InvalidInput(format!("Vault document has wrong shape: {}", e)))?;

        if let Some((platform, _)) = platforms.iter().find(|(_, keys)| keys.is_empty()) {
            return Err(Error::InvalidInput(format!(
                "Vault document has empty platform: {}",
                platform
            )));
        }

        Ok(Self { platforms })
    }
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput(format!("{} cannot be empty", kind)));
    }
    Ok(())
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> Meta {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_add_and_get() {
        let mut vault = Vault::new();
        vault
            .add("github", "token", "ghp_x", meta(&[("scope", "repo")]))
            .unwrap();

        let entry = vault.get("github", "token").unwrap();
        assert_eq!(entry.value, "ghp_x");
        assert_eq!(entry.meta.get("scope").map(String::as_str), Some("repo"));
        assert!(entry.added.ends_with('Z'));
    }

    #[test]
    fn test_add_overwrites() {
        let mut vault = Vault::new();
        vault.add("github", "token", "v1", Meta::new()).unwrap();
        let first_added = vault.get("github", "token").unwrap().added.clone();

        std::thread::sleep(std::time::Duration::from_millis(5));
        vault.add("github", "token", "v2", Meta::new()).unwrap();

        let listing = vault.list();
        assert_eq!(listing["github"].len(), 1);
        let entry = vault.get("github", "token").unwrap();
        assert_eq!(entry.value, "v2");
        assert!(entry.added > first_added);
    }

    #[test]
    fn test_get_missing() {
        let mut vault = Vault::new();
        assert!(matches!(vault.get("github", "token"), Err(Error::NotFound(_))));

        vault.add("github", "token", "x", Meta::new()).unwrap();
        assert!(matches!(vault.get("github", "other"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_remove_prunes_platform() {
        let mut vault = Vault::new();
        vault.add("github", "k", "v", Meta::new()).unwrap();

        let removed = vault.remove("github", "k").unwrap();
        assert_eq!(removed.value, "v");
        assert!(vault.list().is_empty());
        assert!(vault.is_empty());
    }

    #[test]
    fn test_remove_keeps_sibling_keys() {
        let mut vault = Vault::new();
        vault.add("openai", "a", "1", Meta::new()).unwrap();
        vault.add("openai", "b", "2", Meta::new()).unwrap();

        vault.remove("openai", "a").unwrap();

        let listing = vault.list();
        assert_eq!(listing["openai"].len(), 1);
        assert_eq!(listing["openai"][0].name, "b");
    }

    #[test]
    fn test_remove_missing() {
        let mut vault = Vault::new();
        assert!(matches!(vault.remove("github", "k"), Err(Error::NotFound(_))));

        vault.add("github", "k", "v", Meta::new()).unwrap();
        assert!(matches!(vault.remove("github", "x"), Err(Error::NotFound(_))));
        assert!(vault.get("github", "k").is_ok());
    }

    #[test]
    fn test_empty_names_rejected() {
        let mut vault = Vault::new();
        assert!(matches!(
            vault.add("", "k", "v", Meta::new()),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            vault.add("github", "", "v", Meta::new()),
            Err(Error::InvalidInput(_))
        ));
        assert!(vault.is_empty());
    }

    #[test]
    fn test_list_hides_values() {
        let mut vault = Vault::new();
        vault.add("github", "token", "ghp_secret", Meta::new()).unwrap();

        let json = serde_json::to_string(&vault.list()).unwrap();
        assert!(!json.contains("ghp_secret"));
        assert!(json.contains("\"name\":\"token\""));
    }

    #[test]
    fn test_apply_mutations() {
        let mut vault = Vault::new();
        vault
            .apply(Mutation::Add {
                platform: "github".into(),
                key_name: "token".into(),
                value: "x".into(),
                meta: Meta::new(),
            })
            .unwrap();
        assert!(vault.get("github", "token").is_ok());

        vault
            .apply(Mutation::Remove {
                platform: "github".into(),
                key_name: "token".into(),
            })
            .unwrap();
        assert!(vault.is_empty());
    }

    #[test]
    fn test_json_shape() {
        let doc = br#"{"github":{"token":{"value":"ghp_x","added":"2024-01-01T00:00:00.000Z","meta":{}}}}"#;

        let vault = Vault::from_json(doc).unwrap();
        assert_eq!(vault.get("github", "token").unwrap().value, "ghp_x");
        assert_eq!(vault.to_json().unwrap(), doc.to_vec());
    }

    #[test]
    fn test_json_empty_vault() {
        let vault = Vault::from_json(b"{}").unwrap();
        assert!(vault.is_empty());
        assert_eq!(Vault::new().to_json().unwrap(), b"{}".to_vec());
    }

    #[test]
    fn test_json_missing_meta_defaults() {
        let doc = br#"{"github":{"token":{"value":"v","added":"2024-01-01T00:00:00.000Z"}}}"#;
        let vault = Vault::from_json(doc).unwrap();
        assert!(vault.get("github", "token").unwrap().meta.is_empty());
    }

    #[test]
    fn test_json_shape_mismatch() {
        let cases: [&[u8]; 5] = [
            b"[]",
            br#"{"github":"token"}"#,
            br#"{"github":{"token":{"added":"2024-01-01T00:00:00.000Z"}}}"#,
            br#"{"github":{"token":{"value":1,"added":"x"}}}"#,
            br#"{"github":{}}"#,
        ];

        for doc in cases {
            assert!(
                matches!(Vault::from_json(doc), Err(Error::InvalidInput(_))),
                "accepted {}",
                String::from_utf8_lossy(doc)
            );
        }
    }

    #[test]
    fn test_entry_debug_redacted() {
        let entry = VaultEntry::new("ghp_secret", Meta::new());
        assert!(!format!("{:?}", entry).contains("ghp_secret"));
        assert!(!format!("{:?}", Mutation::Add {
            platform: "github".into(),
            key_name: "token".into(),
            value: "ghp_secret".into(),
            meta: Meta::new(),
        })
        .contains("ghp_secret"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn op() -> impl Strategy<Value = (bool, u8, u8)> {
            (any::<bool>(), 0u8..3, 0u8..3)
        }

        proptest! {
            #[test]
            fn no_empty_platforms_after_any_sequence(ops in proptest::collection::vec(op(), 0..40)) {
                let mut vault = Vault::new();
                for (is_add, platform, key) in ops {
                    let platform = format!("p{}", platform);
                    let key = format!("k{}", key);
                    if is_add {
                        vault.add(&platform, &key, "v", Meta::new()).unwrap();
                    } else {
                        let _ = vault.remove(&platform, &key);
                    }
                }

                for summaries in vault.list().values() {
                    prop_assert!(!summaries.is_empty());
                }
                let reparsed = Vault::from_json(&vault.to_json().unwrap()).unwrap();
                prop_assert_eq!(reparsed, vault);
            }
        }
    }
}
