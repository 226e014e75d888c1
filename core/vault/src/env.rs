//! Environment variable export of decrypted credentials.
//!
//! Consumed by the `export` and `exec` front ends; no cryptography happens
//! here, only naming and quoting.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::model::Vault;
use crate::platforms::{synthesized_env_var, PlatformRegistry};
use keyvault_common::{Error, Result};

/// Key name that always receives a configured platform's env var.
pub const PRIMARY_KEY_NAME: &str = "default";

/// Output syntax for `render_exports`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// `export NAME='value'`, for `eval` in POSIX shells.
    #[default]
    Shell,
    /// `NAME="value"`, for `.env` files.
    Dotenv,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "shell" | "sh" => Ok(Self::Shell),
            "dotenv" | "env" => Ok(Self::Dotenv),
            other => Err(Error::InvalidInput(format!(
                "Unknown export format: {} (use shell or dotenv)",
                other
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell => write!(f, "shell"),
            Self::Dotenv => write!(f, "dotenv"),
        }
    }
}

/// Environment variable assignments for every key of `platform`.
///
/// A configured platform's env var goes to its sole key, or to the key
/// named `default` when there are several; all other keys get
/// `{PLATFORM}_{KEY}`.
///
/// # Errors
/// - `NotFound` if the vault has no entries for `platform`
/// - `InvalidInput` if two keys map to the same variable name
pub fn environment_for(
    vault: &Vault,
    registry: &PlatformRegistry,
    platform: &str,
) -> Result<BTreeMap<String, String>> {
    let entries = vault.entries(platform)?;
    let configured = registry.get(platform);
    let sole_key = entries.len() == 1;

    let mut env = BTreeMap::new();
    let mut owners: BTreeMap<String, &str> = BTreeMap::new();
    for (key_name, entry) in entries {
        let name = match configured {
            Some(config) if sole_key || key_name == PRIMARY_KEY_NAME => {
                config.env_var_name.clone()
            }
            _ => synthesized_env_var(platform, key_name),
        };

        if let Some(other) = owners.insert(name.clone(), key_name.as_str()) {
            return Err(Error::InvalidInput(format!(
                "Keys {}/{} and {}/{} both map to {}",
                platform, other, platform, key_name, name
            )));
        }
        env.insert(name, entry.value.clone());
    }
    Ok(env)
}

/// Render assignments one per line in the requested syntax.
pub fn render_exports(env: &BTreeMap<String, String>, format: ExportFormat) -> String {
    env.iter()
        .map(|(name, value)| match format {
            ExportFormat::Shell => format!("export {}={}\n", name, shell_quote(value)),
            ExportFormat::Dotenv => format!("{}={}\n", name, dotenv_quote(value)),
        })
        .collect()
}

/// Single-quote for POSIX shells; embedded quotes become `'\''`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn dotenv_quote(value: &str) -> String {
    let escaped = value
        .replace('\\', r"\\")
        .replace('"', "\\\"")
        .replace('\n', r"\n");
    format!("\"{}\"", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Meta;

    fn vault_with(entries: &[(&str, &str, &str)]) -> Vault {
        let mut vault = Vault::new();
        for (platform, key, value) in entries {
            vault.add(platform, key, *value, Meta::new()).unwrap();
        }
        vault
    }

    #[test]
    fn test_configured_sole_key() {
        let vault = vault_with(&[("github", "token", "ghp_x")]);
        let env = environment_for(&vault, &PlatformRegistry::with_defaults(), "github").unwrap();

        assert_eq!(env.len(), 1);
        assert_eq!(env["GITHUB_TOKEN"], "ghp_x");
    }

    #[test]
    fn test_configured_multiple_keys() {
        let vault = vault_with(&[("openai", "default", "sk-1"), ("openai", "org", "org-2")]);
        let env = environment_for(&vault, &PlatformRegistry::with_defaults(), "openai").unwrap();

        assert_eq!(env["OPENAI_API_KEY"], "sk-1");
        assert_eq!(env["OPENAI_ORG"], "org-2");
    }

    #[test]
    fn test_unconfigured_platform() {
        let vault = vault_with(&[("acme", "api_key", "a"), ("acme", "secret", "b")]);
        let env = environment_for(&vault, &PlatformRegistry::with_defaults(), "acme").unwrap();

        assert_eq!(env["ACME_API_KEY"], "a");
        assert_eq!(env["ACME_SECRET"], "b");
    }

    #[test]
    fn test_missing_platform() {
        let vault = Vault::new();
        assert!(matches!(
            environment_for(&vault, &PlatformRegistry::new(), "github"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_render_shell_quotes() {
        let mut env = BTreeMap::new();
        env.insert("A".to_string(), "it's $HOME".to_string());

        assert_eq!(
            render_exports(&env, ExportFormat::Shell),
            "export A='it'\\''s $HOME'\n"
        );
    }

    #[test]
    fn test_render_dotenv() {
        let mut env = BTreeMap::new();
        env.insert("B".to_string(), "say \"hi\"\nbye".to_string());
        env.insert("A".to_string(), "plain".to_string());

        assert_eq!(
            render_exports(&env, ExportFormat::Dotenv),
            "A=\"plain\"\nB=\"say \\\"hi\\\"\\nbye\"\n"
        );
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("shell".parse::<ExportFormat>().unwrap(), ExportFormat::Shell);
        assert_eq!("dotenv".parse::<ExportFormat>().unwrap(), ExportFormat::Dotenv);
        assert!("fish".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_configured_name_collision() {
        let vault = vault_with(&[("openai", "default", "sk-1"), ("openai", "api_key", "sk-2")]);
        let result = environment_for(&vault, &PlatformRegistry::with_defaults(), "openai");

        match result {
            Err(Error::InvalidInput(msg)) => {
                assert!(msg.contains("openai/api_key"));
                assert!(msg.contains("openai/default"));
                assert!(msg.contains("OPENAI_API_KEY"));
            }
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_sanitized_name_collision() {
        let vault = vault_with(&[("acme", "api-key", "a"), ("acme", "api_key", "b")]);
        assert!(matches!(
            environment_for(&vault, &PlatformRegistry::new(), "acme"),
            Err(Error::InvalidInput(_))
        ));
    }
}
