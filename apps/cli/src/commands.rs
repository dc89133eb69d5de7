//! CLI command definitions, routing, and tracing setup.

use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use identity_core::Reconciler;
use identity_shared::{
    AppConfig, ContactId, IdentifyRequest, ReconcileOptions, expand_home, init_config,
    load_config, load_config_from,
};
use identity_storage::Storage;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// identity: resolve partial contact records into one canonical identity.
#[derive(Parser)]
#[command(
    name = "identity",
    version,
    about = "Reconcile email/phone contact records into canonical identities.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Contact database path (overrides the config file).
    #[arg(long, env = "IDENTITY_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Config file path (defaults to ~/.identity/identity.toml).
    #[arg(long, env = "IDENTITY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Reconcile one email/phone signature and print the consolidated contact.
    Identify {
        /// Email address.
        #[arg(short, long)]
        email: Option<String>,

        /// Phone number.
        #[arg(short, long)]
        phone: Option<String>,

        /// Read a JSON request body (`{"email": ..., "phoneNumber": ...}`) from a file, or `-` for stdin.
        #[arg(long, conflicts_with_all = ["email", "phone"])]
        input: Option<String>,
    },

    /// Inspect or maintain stored contacts.
    Contacts {
        #[command(subcommand)]
        action: ContactsAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Contact maintenance subcommands.
#[derive(Subcommand)]
pub(crate) enum ContactsAction {
    /// List all non-deleted contacts.
    List,
    /// Soft-delete a contact so it no longer takes part in reconciliation.
    Delete {
        /// Contact id.
        id: ContactId,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = ["identity_cli", "identity_core", "identity_storage", "identity_shared"]
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so stdout stays machine-readable.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match cli.config.as_deref() {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let db_path = match cli.db {
        Some(path) => path,
        None => expand_home(&config.database.path)?,
    };

    match cli.command {
        Command::Identify {
            email,
            phone,
            input,
        } => cmd_identify(&config, &db_path, email, phone, input.as_deref()).await,
        Command::Contacts { action } => match action {
            ContactsAction::List => cmd_contacts_list(&db_path).await,
            ContactsAction::Delete { id } => cmd_contacts_delete(&db_path, id).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config, &db_path).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_identify(
    config: &AppConfig,
    db_path: &Path,
    email: Option<String>,
    phone: Option<String>,
    input: Option<&str>,
) -> Result<()> {
    let request = match input {
        Some(source) => read_request(source)?,
        None => IdentifyRequest {
            email,
            phone_number: phone,
        },
    };

    let storage = Storage::open(db_path).await?;
    let reconciler = Reconciler::new(storage, ReconcileOptions::from(config));

    info!(db = %db_path.display(), "reconciling contact");
    let response = reconciler.identify(request).await.map_err(|e| {
        if e.is_client_error() {
            eyre!("bad request: {e}")
        } else {
            eyre!(e)
        }
    })?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Parse a JSON request body from a file path or `-` (stdin).
fn read_request(source: &str) -> Result<IdentifyRequest> {
    let body = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(source).map_err(|e| eyre!("cannot read '{source}': {e}"))?
    };

    serde_json::from_str(&body).map_err(|e| eyre!("invalid request body: {e}"))
}

async fn cmd_contacts_list(db_path: &Path) -> Result<()> {
    if !db_path.exists() {
        return Err(eyre!("no contact database at '{}'", db_path.display()));
    }
    let storage = Storage::open_readonly(db_path).await?;
    let contacts = storage.list_contacts().await?;

    println!(
        "{:>6}  {:<10}  {:>6}  {:<32}  {:<16}  CREATED",
        "ID", "PRECEDENCE", "LINKED", "EMAIL", "PHONE"
    );
    for c in &contacts {
        println!(
            "{:>6}  {:<10}  {:>6}  {:<32}  {:<16}  {}",
            c.id,
            c.link_precedence,
            c.linked_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
            c.email.as_deref().unwrap_or("-"),
            c.phone_number.as_deref().unwrap_or("-"),
            c.created_at.to_rfc3339(),
        );
    }
    info!(count = contacts.len(), "listed contacts");
    Ok(())
}

async fn cmd_contacts_delete(db_path: &Path, id: ContactId) -> Result<()> {
    let storage = Storage::open(db_path).await?;
    if storage.soft_delete_contact(id).await? {
        println!("Contact {id} deleted.");
        Ok(())
    } else {
        Err(eyre!("contact {id} not found or already deleted"))
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig, db_path: &Path) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    println!("# resolved database: {}", db_path.display());
    Ok(())
}
