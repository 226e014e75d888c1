//! Common types used throughout KeyVault.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Name under which one user's salt and vault blob are stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Create a new Identity from a string.
    ///
    /// # Preconditions
    /// - `id` must be non-empty
    /// - `id` must not contain `:`, `/` or `\`, and must not start with `.`
    ///
    /// # Errors
    /// - Returns `InvalidInput` if any precondition is violated
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Identity cannot be empty".to_string(),
            ));
        }
        if id.contains([':', '/', '\\']) {
            return Err(crate::Error::InvalidInput(
                "Identity cannot contain ':', '/' or '\\'".to_string(),
            ));
        }
        // Dot-prefixed names are reserved for store temp files
        if id.starts_with('.') {
            return Err(crate::Error::InvalidInput(
                "Identity cannot start with '.'".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store key holding the unencrypted per-identity salt.
    pub fn salt_key(&self) -> String {
        format!("{}:salt", self.0)
    }

    /// Store key holding the encrypted vault blob.
    pub fn vault_key(&self) -> String {
        format!("{}:vault", self.0)
    }

    /// Store key holding the timestamp of the last successful mutation.
    pub fn last_modified_key(&self) -> String {
        format!("{}:lastModified", self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.0
    }
}

/// Master password bytes, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Password(Vec<u8>);

impl Password {
    /// Wrap raw password bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Get a reference to the password bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl PartialEq for Password {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identity_creation() {
        let id = Identity::new("alice").unwrap();
        assert_eq!(id.as_str(), "alice");
    }

    #[test]
    fn test_identity_empty_fails() {
        assert!(Identity::new("").is_err());
    }

    #[test]
    fn test_identity_rejects_separators() {
        assert!(Identity::new("a:b").is_err());
        assert!(Identity::new("a/b").is_err());
        assert!(Identity::new("a\\b").is_err());
        assert!(Identity::new("..").is_err());
    }

    #[test]
    fn test_identity_rejects_leading_dot() {
        assert!(matches!(
            Identity::new(".hidden"),
            Err(crate::Error::InvalidInput(_))
        ));
        assert!(Identity::new(".").is_err());
        assert!(Identity::new("a.b").is_ok());
        assert!(serde_json::from_str::<Identity>("\".hidden\"").is_err());
    }

    #[test]
    fn test_identity_store_keys() {
        let id = Identity::new("alice").unwrap();
        assert_eq!(id.salt_key(), "alice:salt");
        assert_eq!(id.vault_key(), "alice:vault");
        assert_eq!(id.last_modified_key(), "alice:lastModified");
    }

    #[test]
    fn test_identity_deserialize_validates() {
        let ok: Identity = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(ok.as_str(), "bob");
        assert!(serde_json::from_str::<Identity>("\"b:ob\"").is_err());
    }

    #[test]
    fn test_password_debug_redacted() {
        let password = Password::from("correcthorse123");
        let debug = format!("{:?}", password);
        assert!(!debug.contains("correcthorse"));
    }

    proptest! {
        #[test]
        fn prop_identity_keys_share_prefix(name in "[a-zA-Z0-9_.@-]{1,32}") {
            prop_assume!(!name.starts_with('.'));
            let id = Identity::new(name.clone()).unwrap();
            let prefix = format!("{}:", name);
            prop_assert!(id.salt_key().starts_with(&prefix));
            prop_assert!(id.vault_key().starts_with(&prefix));
        }
    }
}
