//! KeyVault CLI - Command line interface for the credential vault.
//!
//! Stores per-platform API credentials in an encrypted vault under the
//! user's home directory and exports them into child process environments.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use keyvault_common::{Identity, Password};
use keyvault_crypto::KdfParams;
use keyvault_storage::LocalStore;
use keyvault_vault::{
    render_exports, ExportFormat, Meta, PlatformRegistry, ServiceConfig, VaultService,
};

/// Read instead of prompting when set.
const PASSWORD_ENV: &str = "KEYVAULT_PASSWORD";

#[derive(Parser)]
#[command(name = "keyvault")]
#[command(about = "KeyVault - Encrypted API credential storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the vault files (default: ~/.keyvault).
    #[arg(long, env = "KEYVAULT_HOME", global = true)]
    home: Option<PathBuf>,

    /// Vault owner.
    #[arg(long, default_value = "local", global = true)]
    identity: String,

    /// JSON file with additional platform definitions.
    #[arg(long, env = "KEYVAULT_PLATFORMS", global = true)]
    platforms: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault.
    Init,

    /// Store a credential, replacing any existing one.
    Add {
        /// Platform identifier, e.g. "github".
        platform: String,

        /// Key name within the platform.
        key: String,

        /// Secret value (prompted when omitted).
        #[arg(long)]
        value: Option<String>,

        /// Metadata as key=value; may be repeated.
        #[arg(short, long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },

    /// Print a credential value.
    Get {
        platform: String,
        key: String,
    },

    /// List platforms and key names (never values).
    List {
        /// Output JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete a credential.
    Remove {
        platform: String,
        key: String,
    },

    /// Print environment assignments for a platform.
    Export {
        platform: String,

        /// Output syntax: "shell" or "dotenv".
        #[arg(short, long, default_value = "shell", value_parser = parse_format)]
        format: ExportFormat,
    },

    /// Run a command with a platform's credentials in its environment.
    Exec {
        platform: String,

        /// Command and arguments, after `--`.
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Show known platforms and their environment variables.
    Platforms,

    /// Show whether a vault exists and when it last changed.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Secrets go to stdout, so keep the default log level quiet
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let app = App::new(&cli)?;

    match cli.command {
        Commands::Init => cmd_init(&app).await,

        Commands::Add {
            platform,
            key,
            value,
            meta,
        } => cmd_add(&app, &platform, &key, value, meta).await,

        Commands::Get { platform, key } => cmd_get(&app, &platform, &key).await,

        Commands::List { json } => cmd_list(&app, json).await,

        Commands::Remove { platform, key } => cmd_remove(&app, &platform, &key).await,

        Commands::Export { platform, format } => cmd_export(&app, &platform, format).await,

        Commands::Exec { platform, command } => cmd_exec(&app, &platform, &command).await,

        Commands::Platforms => cmd_platforms(&app),

        Commands::Status => cmd_status(&app).await,
    }
}

/// Resolved global options.
struct App {
    home: PathBuf,
    identity: Identity,
    registry: PlatformRegistry,
    service: VaultService,
}

impl App {
    fn new(cli: &Cli) -> Result<Self> {
        let home = match &cli.home {
            Some(home) => home.clone(),
            None => dirs::home_dir()
                .context("Could not determine home directory; pass --home")?
                .join(".keyvault"),
        };
        debug!("Using vault home {}", home.display());

        let identity = Identity::new(cli.identity.as_str()).context("Invalid identity")?;

        let registry = match &cli.platforms {
            Some(path) => PlatformRegistry::load(path)
                .with_context(|| format!("Failed to load platforms from {}", path.display()))?,
            None => PlatformRegistry::with_defaults(),
        };

        let store = LocalStore::new(&home).context("Failed to open vault directory")?;
        let config = ServiceConfig {
            kdf_params: KdfParams::interactive(),
            ..ServiceConfig::default()
        };
        let service = VaultService::new(Arc::new(store), config);

        Ok(Self {
            home,
            identity,
            registry,
            service,
        })
    }

    /// Prompt for the password, asking twice when the vault will be created.
    async fn password(&self) -> Result<Password> {
        let status = self
            .service
            .status(&self.identity)
            .await
            .context("Failed to read vault status")?;

        if status.exists {
            read_password("Enter password: ")
        } else {
            info!("No vault for {}; creating one", self.identity);
            new_password()
        }
    }

    /// Prompt for the password of a vault that must already exist.
    async fn existing_password(&self) -> Result<Password> {
        let status = self
            .service
            .status(&self.identity)
            .await
            .context("Failed to read vault status")?;

        if !status.exists {
            anyhow::bail!(
                "No vault for identity '{}' in {}. Run `keyvault init` first",
                self.identity,
                self.home.display()
            );
        }
        read_password("Enter password: ")
    }
}

/// Prompt for password securely.
fn read_password(prompt: &str) -> Result<Password> {
    if let Some(password) = password_from_env() {
        return Ok(password);
    }
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Password::from(password))
}

fn password_from_env() -> Option<Password> {
    std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|password| !password.is_empty())
        .map(Password::from)
}

/// Prompt for a new password with confirmation.
fn new_password() -> Result<Password> {
    let password = read_password("New vault password: ")?;
    if password_from_env().is_none() {
        let confirm = read_password("Confirm password: ")?;
        if password != confirm {
            anyhow::bail!("Passwords do not match");
        }
    }

    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }
    Ok(password)
}

fn parse_meta(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err("metadata key cannot be empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_format(s: &str) -> std::result::Result<ExportFormat, String> {
    s.parse().map_err(|e: keyvault_common::Error| e.to_string())
}

/// Create a new vault.
async fn cmd_init(app: &App) -> Result<()> {
    let status = app.service.status(&app.identity).await?;
    if status.exists {
        anyhow::bail!("A vault for identity '{}' already exists", app.identity);
    }

    let password = new_password()?;
    let mut session = app
        .service
        .open(&app.identity, &password)
        .await
        .context("Failed to create vault")?;
    session.close();

    println!("Vault created successfully!");
    println!("  Identity: {}", app.identity);
    println!("  Location: {}", app.home.display());

    Ok(())
}

/// Store a credential.
async fn cmd_add(
    app: &App,
    platform: &str,
    key: &str,
    value: Option<String>,
    meta: Vec<(String, String)>,
) -> Result<()> {
    let password = app.password().await?;

    let value = match value {
        Some(value) => Zeroizing::new(value),
        None => Zeroizing::new(
            rpassword::prompt_password(format!("Value for {}/{}: ", platform, key))
                .context("Failed to read value")?,
        ),
    };
    if value.is_empty() {
        anyhow::bail!("Value cannot be empty");
    }

    let meta: Meta = meta.into_iter().collect();
    app.service
        .add(&app.identity, &password, platform, key, value.as_str(), meta)
        .await
        .context("Failed to add credential")?;

    println!("Stored {}/{}", platform, key);
    Ok(())
}

/// Print one credential value.
async fn cmd_get(app: &App, platform: &str, key: &str) -> Result<()> {
    let password = app.existing_password().await?;

    let entry = app
        .service
        .get(&app.identity, &password, platform, key)
        .await
        .context("Failed to read credential")?;

    println!("{}", entry.value);
    Ok(())
}

/// List stored platforms and key names.
async fn cmd_list(app: &App, json: bool) -> Result<()> {
    let password = app.existing_password().await?;

    let listing = app
        .service
        .list(&app.identity, &password)
        .await
        .context("Failed to list vault")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    if listing.is_empty() {
        println!("Vault is empty.");
        return Ok(());
    }

    for (platform, entries) in &listing {
        let label = app
            .registry
            .get(platform)
            .map(|config| format!("{} ({})", platform, config.name))
            .unwrap_or_else(|| platform.clone());
        println!("{}", label);

        for entry in entries {
            let meta = entry
                .meta
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", ");
            if meta.is_empty() {
                println!("  {}  added {}", entry.name, entry.added);
            } else {
                println!("  {}  added {}  [{}]", entry.name, entry.added, meta);
            }
        }
    }

    Ok(())
}

/// Delete a credential.
async fn cmd_remove(app: &App, platform: &str, key: &str) -> Result<()> {
    let password = app.existing_password().await?;

    app.service
        .remove(&app.identity, &password, platform, key)
        .await
        .context("Failed to remove credential")?;

    println!("Removed {}/{}", platform, key);
    Ok(())
}

/// Print export lines for a platform.
async fn cmd_export(app: &App, platform: &str, format: ExportFormat) -> Result<()> {
    let password = app.existing_password().await?;

    let env = app
        .service
        .environment(&app.identity, &password, &app.registry, platform)
        .await
        .context("Failed to export credentials")?;

    let rendered = Zeroizing::new(render_exports(&env, format));
    print!("{}", rendered.as_str());
    Ok(())
}

/// Run a child process with a platform's credentials injected.
async fn cmd_exec(app: &App, platform: &str, command: &[String]) -> Result<()> {
    let (program, args) = command
        .split_first()
        .context("No command given after --")?;

    let password = app.existing_password().await?;
    let env = app
        .service
        .environment(&app.identity, &password, &app.registry, platform)
        .await
        .context("Failed to load credentials")?;
    drop(password);

    debug!(
        "Running {} with {} credential variables for {}",
        program,
        env.len(),
        platform
    );

    let status = tokio::process::Command::new(program)
        .args(args)
        .envs(&env)
        .status()
        .await
        .with_context(|| format!("Failed to run {}", program))?;
    drop(env);

    std::process::exit(exit_code(status));
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

/// Show the platform table.
fn cmd_platforms(app: &App) -> Result<()> {
    if app.registry.is_empty() {
        println!("No platforms configured.");
        return Ok(());
    }

    println!("{:<14} {:<20} {:<22} URL", "ID", "NAME", "ENV VAR");
    for (id, config) in app.registry.platforms() {
        println!(
            "{:<14} {:<20} {:<22} {}",
            id, config.name, config.env_var_name, config.url_pattern
        );
    }
    Ok(())
}

/// Show vault existence and last modification time.
async fn cmd_status(app: &App) -> Result<()> {
    let status = app
        .service
        .status(&app.identity)
        .await
        .context("Failed to read vault status")?;

    println!("Identity: {}", app.identity);
    println!("Location: {}", vault_location(&app.home).display());
    if status.exists {
        println!("Vault:    present");
        println!(
            "Modified: {}",
            status.last_modified.as_deref().unwrap_or("unknown")
        );
    } else {
        println!("Vault:    not created");
    }
    Ok(())
}

fn vault_location(home: &Path) -> PathBuf {
    home.canonicalize().unwrap_or_else(|_| home.to_path_buf())
}
