//! Platform registry: display metadata and environment variable names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use keyvault_common::{Error, Result};

const DEFAULT_PLATFORMS: &str = include_str!("platforms.json");

/// Display metadata for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    pub name: String,
    #[serde(default)]
    pub url_pattern: String,
    pub env_var_name: String,
}

/// Read-mostly mapping from platform identifier to its configuration.
#[derive(Debug, Clone, Default)]
pub struct PlatformRegistry {
    platforms: BTreeMap<String, PlatformConfig>,
}

impl PlatformRegistry {
    /// Create an empty registry; every lookup is synthesized.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with the built-in platform table.
    pub fn with_defaults() -> Self {
        Self::from_json_or_empty(DEFAULT_PLATFORMS.as_bytes())
    }

    fn from_json_or_empty(bytes: &[u8]) -> Self {
        Self::from_json(bytes).unwrap_or_else(|e| {
            warn!("Built-in platform table is unusable, starting empty: {}", e);
            Self::default()
        })
    }

    /// Parse a JSON object of `id -> {name, urlPattern, envVarName}`.
    ///
    /// # Errors
    /// - `InvalidInput` if the document has the wrong shape
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let platforms: BTreeMap<String, PlatformConfig> = serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidInput(format!("Invalid platform table: {}", e)))?;
        Ok(Self { platforms })
    }

    /// Built-in defaults overlaid with the table stored at `path`.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist
    /// - `InvalidInput` if the file is not a valid platform table
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("Platform table not found: {}", path.display()))
            }
            _ => Error::Io(e),
        })?;

        let overrides = Self::from_json(&bytes)?;
        debug!(
            "Loaded {} platform definitions from {}",
            overrides.platforms.len(),
            path.display()
        );

        let mut registry = Self::with_defaults();
        registry.extend(overrides);
        Ok(registry)
    }

    /// Add or replace definitions from another registry.
    pub fn extend(&mut self, other: PlatformRegistry) {
        self.platforms.extend(other.platforms);
    }

    /// Configured definition of a platform, if any.
    pub fn get(&self, platform_id: &str) -> Option<&PlatformConfig> {
        self.platforms.get(platform_id)
    }

    /// Configuration for a platform key, synthesizing one for unknown
    /// platforms with env var `{PLATFORM}_{KEY}`.
    pub fn resolve(&self, platform_id: &str, key_name: &str) -> PlatformConfig {
        self.get(platform_id).cloned().unwrap_or_else(|| PlatformConfig {
            name: platform_id.to_string(),
            url_pattern: String::new(),
            env_var_name: synthesized_env_var(platform_id, key_name),
        })
    }

    /// All configured platforms, sorted by identifier.
    pub fn platforms(&self) -> impl Iterator<Item = (&str, &PlatformConfig)> {
        self.platforms.iter().map(|(id, config)| (id.as_str(), config))
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }
}

/// `{PLATFORM}_{KEY}` upper-cased, with characters that are not valid in
/// environment variable names replaced by `_`.
pub fn synthesized_env_var(platform_id: &str, key_name: &str) -> String {
    let raw = format!("{}_{}", platform_id, key_name);
    let mut name: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_parse() {
        let registry = PlatformRegistry::with_defaults();
        assert!(!registry.is_empty());

        let github = registry.get("github").unwrap();
        assert_eq!(github.name, "GitHub");
        assert_eq!(github.env_var_name, "GITHUB_TOKEN");
        assert!(PlatformRegistry::from_json(DEFAULT_PLATFORMS.as_bytes()).is_ok());
    }

    #[test]
    fn test_broken_table_falls_back_to_empty() {
        let registry = PlatformRegistry::from_json_or_empty(b"{not json");
        assert!(registry.is_empty());
        assert_eq!(registry.resolve("github", "token").env_var_name, "GITHUB_TOKEN");
    }

    #[test]
    fn test_resolve_configured() {
        let registry = PlatformRegistry::with_defaults();
        let config = registry.resolve("openai", "whatever");
        assert_eq!(config.env_var_name, "OPENAI_API_KEY");
    }

    #[test]
    fn test_resolve_synthesized() {
        let registry = PlatformRegistry::new();
        let config = registry.resolve("acme", "api_key");

        assert_eq!(config.name, "acme");
        assert_eq!(config.env_var_name, "ACME_API_KEY");
    }

    #[test]
    fn test_synthesized_env_var_sanitized() {
        assert_eq!(synthesized_env_var("my-cloud", "key.v2"), "MY_CLOUD_KEY_V2");
        assert_eq!(synthesized_env_var("1password", "token"), "_1PASSWORD_TOKEN");
    }

    #[test]
    fn test_from_json_wire_names() {
        let registry = PlatformRegistry::from_json(
            br#"{"acme":{"name":"Acme","urlPattern":"https://acme.test/keys","envVarName":"ACME_TOKEN"}}"#,
        )
        .unwrap();

        let acme = registry.get("acme").unwrap();
        assert_eq!(acme.url_pattern, "https://acme.test/keys");
        assert_eq!(acme.env_var_name, "ACME_TOKEN");
    }

    #[test]
    fn test_from_json_rejects_bad_shape() {
        assert!(matches!(
            PlatformRegistry::from_json(br#"{"acme":{"name":"Acme"}}"#),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_load_overlays_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("platforms.json");
        std::fs::write(
            &path,
            br#"{"github":{"name":"GitHub Enterprise","envVarName":"GH_ENTERPRISE_TOKEN"},
                "acme":{"name":"Acme","envVarName":"ACME_TOKEN"}}"#,
        )
        .unwrap();

        let registry = PlatformRegistry::load(&path).unwrap();
        assert_eq!(registry.get("github").unwrap().env_var_name, "GH_ENTERPRISE_TOKEN");
        assert_eq!(registry.get("acme").unwrap().env_var_name, "ACME_TOKEN");
        assert_eq!(registry.get("openai").unwrap().env_var_name, "OPENAI_API_KEY");
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = PlatformRegistry::load(temp.path().join("absent.json"));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
