//! keyledger command-line interface: register, rotate, revoke and use keys
//! whose state lives on the ledger and whose encrypted blobs live in a
//! content store.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use keyledger_core::{
    crypto::{self, CipherBundle},
    logging,
    registry::{KeyRecord, LedgerRegistry, LedgerSession, LifecycleEvent},
    store::ContentStore,
    workflow::{self, WorkflowLevel, WorkflowReport},
    DirStore, ErrorClass, KeyId, KeyledgerConfig, KeyledgerError, LifecycleManager, MemoryLedger,
    NameBook, Principal, RawKeyMaterial, StoreBackend,
};
use keyledger_ipfs::PinataStore;
use log::warn;
use rpassword::prompt_password;
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "keyledger",
    version,
    about = "Ledger-anchored lifecycle management for symmetric encryption keys."
)]
struct Cli {
    /// Path to the keyledger configuration file.
    #[arg(short, long, default_value = "/etc/keyledger.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new key, store it encrypted, and register it on the ledger.
    Register {
        /// Human-readable key name; its hash becomes the key id.
        name: String,

        /// Password protecting the key blob (prompted when omitted).
        #[arg(long)]
        password: Option<String>,
    },

    /// Replace a key's material with a freshly generated one.
    Rotate {
        /// Key name or 0x-prefixed key id.
        key: String,

        #[arg(long)]
        password: Option<String>,
    },

    /// Permanently revoke a key.
    Revoke {
        /// Key name or 0x-prefixed key id.
        key: String,

        /// Skip the interactive confirmation.
        #[arg(long)]
        force: bool,
    },

    /// List keys registered by an owner (defaults to the configured principal).
    List {
        #[arg(long)]
        owner: Option<String>,
    },

    /// Show the ledger event history of a key.
    Events {
        /// Key name or 0x-prefixed key id.
        key: String,
    },

    /// Decrypt a key's blob and print the raw key material.
    Unlock {
        /// Key name or 0x-prefixed key id.
        key: String,

        #[arg(long)]
        password: Option<String>,
    },

    /// Encrypt a message with a key and print the cipher bundle as JSON.
    Encrypt {
        /// Key name or 0x-prefixed key id.
        key: String,

        message: String,

        #[arg(long)]
        password: Option<String>,
    },

    /// Decrypt a JSON cipher bundle produced by `encrypt`.
    Decrypt {
        /// Key name or 0x-prefixed key id.
        key: String,

        /// Bundle JSON: {"ciphertext": .., "iv": .., "algorithm": ..}.
        bundle: String,

        #[arg(long)]
        password: Option<String>,
    },

    /// Exercise the full key lifecycle against throwaway in-memory backends.
    SelfTest,

    /// Validate a configuration file or emit the config schema.
    Validate {
        /// Path to the configuration file to validate.
        #[arg(short = 'f', long, default_value = "/etc/keyledger.toml")]
        file: PathBuf,

        /// Output the JSON schema instead of validating a file.
        #[arg(long)]
        schema: bool,
    },
}

/// Gateway links for stored blobs; only the Pinata backend has them.
struct Links {
    pinata: Option<Arc<PinataStore>>,
}

impl Links {
    fn link(&self, cid: &str) -> Option<String> {
        self.pinata.as_ref().map(|pinata| pinata.gateway_url(cid))
    }
}

type Manager = LifecycleManager<Box<dyn ContentStore>, LedgerSession>;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        if let Some(hint) = hint_for(&err) {
            eprintln!("hint: {hint}");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    logging::init("warn");
    let cli = Cli::parse();
    let config_path = cli.config.clone();

    match cli.command {
        Commands::Register { name, password } => {
            if name.trim().is_empty() {
                bail!("key name must not be empty");
            }
            let config = load_config(&config_path)?;
            let (manager, links) = open_manager(&config)?;
            let password = new_password(password, &name)?;

            let registration = manager.register_key(&name, &password).await?;
            remember_name(&config, &name);

            println!("Registered key `{name}`.");
            println!("  key id:       {}", registration.key_id);
            print_content_ref(&links, &registration.content_ref);
            println!("  transaction:  {}", registration.confirmation.tx_hash);
            println!("  block:        {}", registration.confirmation.block_number);
            print_raw_key_once(&registration.raw_key);
        }
        Commands::Rotate { key, password } => {
            let config = load_config(&config_path)?;
            let (manager, links) = open_manager(&config)?;
            let key_id = resolve_key(&key);
            let names = load_names(&config);
            let label = names.display_name(&key_id);
            let password = new_password(password, &label)?;

            let rotation = manager.rotate_key(&key_id, &password).await?;

            println!("Rotated key `{label}` ({key_id}).");
            print_content_ref(&links, &rotation.content_ref);
            println!("  transaction:  {}", rotation.confirmation.tx_hash);
            println!("  block:        {}", rotation.confirmation.block_number);
            print_raw_key_once(&rotation.raw_key);
        }
        Commands::Revoke { key, force } => {
            let config = load_config(&config_path)?;
            let (manager, _) = open_manager(&config)?;
            let key_id = resolve_key(&key);
            let label = load_names(&config).display_name(&key_id);

            if !force {
                println!("*** KEY REVOCATION ***");
                println!("Revoking `{label}` ({key_id}) is permanent; it can never be rotated again.");
                println!("Type REVOKE to continue or press Enter to abort:");
                print!("> ");
                io::stdout().flush().ok();
                let mut confirm = String::new();
                io::stdin().read_line(&mut confirm)?;
                if confirm.trim() != "REVOKE" {
                    println!("Revocation aborted.");
                    return Ok(());
                }
            }

            let confirmation = manager.revoke_key(&key_id).await?;
            println!(
                "Revoked key `{label}` in block {} (tx {}).",
                confirmation.block_number, confirmation.tx_hash
            );
        }
        Commands::List { owner } => {
            let config = load_config(&config_path)?;
            let (manager, _) = open_manager(&config)?;
            let owner = owner
                .map(Principal::new)
                .unwrap_or_else(|| manager.principal().clone());
            let records = manager.list_keys(&owner).await?;
            if records.is_empty() {
                println!("No keys registered by {owner}.");
            } else {
                print_key_table(&records, &load_names(&config));
            }
        }
        Commands::Events { key } => {
            let config = load_config(&config_path)?;
            let (manager, _) = open_manager(&config)?;
            let key_id = resolve_key(&key);
            let events = manager.list_events(&key_id).await?;
            if events.is_empty() {
                println!("No ledger events for {key_id}.");
            } else {
                println!("{}", load_names(&config).display_name(&key_id));
                print_event_log(&events);
            }
        }
        Commands::Unlock { key, password } => {
            let config = load_config(&config_path)?;
            let (manager, _) = open_manager(&config)?;
            let key_id = resolve_key(&key);
            let password = existing_password(password, &key)?;

            let raw_key = manager.unlock_key(&key_id, &password).await?;
            warn_if_revoked(&manager, &key_id).await;
            println!("{}", raw_key.to_base64().as_str());
        }
        Commands::Encrypt {
            key,
            message,
            password,
        } => {
            let config = load_config(&config_path)?;
            let (manager, _) = open_manager(&config)?;
            let key_id = resolve_key(&key);
            let password = existing_password(password, &key)?;

            let raw_key = manager.unlock_key(&key_id, &password).await?;
            warn_if_revoked(&manager, &key_id).await;
            let bundle = crypto::encrypt_message(&message, &raw_key)?;
            println!("{}", to_string_pretty(&bundle)?);
        }
        Commands::Decrypt {
            key,
            bundle,
            password,
        } => {
            let bundle: CipherBundle =
                serde_json::from_str(&bundle).context("bundle is not valid cipher bundle JSON")?;
            let config = load_config(&config_path)?;
            let (manager, _) = open_manager(&config)?;
            let key_id = resolve_key(&key);
            let password = existing_password(password, &key)?;

            let raw_key = manager.unlock_key(&key_id, &password).await?;
            let plaintext = crypto::decrypt_message(&bundle, &raw_key)?;
            println!("{plaintext}");
        }
        Commands::SelfTest => {
            let report = workflow::self_test().await?;
            let passed = report.passed();
            print_report(report);
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Validate { file, schema } => {
            if schema {
                let schema = schema_for!(KeyledgerConfig);
                println!("{}", to_string_pretty(&schema)?);
                return Ok(());
            }

            let cfg = KeyledgerConfig::load(&file)
                .with_context(|| format!("failed to load configuration from {}", file.display()))?;

            let issues = cfg.validate();
            if issues.is_empty() {
                println!(
                    "Configuration valid (principal {}, {} store).",
                    cfg.principal(),
                    backend_label(cfg.store.backend)
                );
            } else {
                eprintln!("Configuration validation failed:");
                for issue in issues {
                    eprintln!("  - {issue}");
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<KeyledgerConfig> {
    KeyledgerConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Build the content store selected by `store.backend`.
fn open_store(config: &KeyledgerConfig) -> Result<(Box<dyn ContentStore>, Links)> {
    match config.store.backend {
        StoreBackend::Directory => Ok((
            Box::new(DirStore::new(config.store_dir())),
            Links { pinata: None },
        )),
        StoreBackend::Pinata => {
            let pinata = Arc::new(PinataStore::from_config(config)?);
            Ok((
                Box::new(Arc::clone(&pinata)),
                Links {
                    pinata: Some(pinata),
                },
            ))
        }
    }
}

fn open_manager(config: &KeyledgerConfig) -> Result<(Manager, Links)> {
    let state_path = config.state_path();
    let ledger = MemoryLedger::open(&state_path)
        .with_context(|| format!("failed to open ledger state {}", state_path.display()))?;
    let (store, links) = open_store(config)?;
    Ok((
        LifecycleManager::new(store, ledger.connect(config.principal())),
        links,
    ))
}

/// Accept either a 0x-prefixed key id or a key name.
fn resolve_key(input: &str) -> KeyId {
    if input.starts_with("0x") || input.starts_with("0X") {
        if let Ok(id) = input.parse() {
            return id;
        }
    }
    KeyId::from_name(input)
}

fn load_names(config: &KeyledgerConfig) -> NameBook {
    let path = config.names_path();
    NameBook::load(&path).unwrap_or_else(|err| {
        warn!("ignoring unreadable name book {}: {err}", path.display());
        NameBook::default()
    })
}

fn remember_name(config: &KeyledgerConfig, name: &str) {
    let mut names = load_names(config);
    names.record(name);
    if let Err(err) = names.save() {
        warn!("could not update name book {}: {err}", names.path().display());
    }
}

/// Prompt twice for a password that will protect a new blob.
fn new_password(provided: Option<String>, label: &str) -> Result<String> {
    if let Some(password) = provided {
        return Ok(password);
    }
    let first = prompt_password(format!("New password for {label}: "))?;
    if first.is_empty() {
        bail!("password must not be empty");
    }
    let second = prompt_password("Repeat password: ")?;
    if first != second {
        bail!("passwords do not match");
    }
    Ok(first)
}

fn existing_password(provided: Option<String>, label: &str) -> Result<String> {
    match provided {
        Some(password) => Ok(password),
        None => Ok(prompt_password(format!("Password for {label}: "))?),
    }
}

async fn warn_if_revoked(manager: &Manager, key_id: &KeyId) {
    if let Ok(record) = manager.ledger().get_metadata(key_id).await {
        if !record.is_active() {
            eprintln!("warning: key {key_id} is revoked; do not use it for new data");
        }
    }
}

fn print_content_ref(links: &Links, cid: &str) {
    println!("  content ref:  {cid}");
    if let Some(url) = links.link(cid) {
        println!("  gateway:      {url}");
    }
}

fn print_raw_key_once(raw_key: &RawKeyMaterial) {
    println!();
    println!("Raw key (base64), shown once. Store it somewhere safe:");
    println!("  {}", raw_key.to_base64().as_str());
}

/// Pretty-print a workflow report so humans can follow along.
fn print_report(report: WorkflowReport) {
    println!("{}", report.title);
    for event in report.events {
        println!("  [{}] {}", level_tag(event.level), event.message);
    }
}

/// Short tag used when printing workflow severity levels.
fn level_tag(level: WorkflowLevel) -> &'static str {
    match level {
        WorkflowLevel::Info => "INFO",
        WorkflowLevel::Success => "OK",
        WorkflowLevel::Warn => "WARN",
        WorkflowLevel::Error => "ERR",
        WorkflowLevel::Security => "SEC",
    }
}

fn backend_label(backend: StoreBackend) -> &'static str {
    match backend {
        StoreBackend::Directory => "directory",
        StoreBackend::Pinata => "pinata",
    }
}

fn print_key_table(records: &[KeyRecord], names: &NameBook) {
    println!(
        "{:<24} {:<14} {:<8} {:<12} {}",
        "NAME", "KEY ID", "STATE", "ROTATED", "CONTENT"
    );
    for record in records {
        let rotated = if record.was_rotated() {
            record.rotated_at.to_string()
        } else {
            "never".to_string()
        };
        println!(
            "{:<24} {:<14} {:<8} {:<12} {}",
            names.display_name(&record.key_id),
            record.key_id.short(),
            record.state_label(),
            rotated,
            record.content_ref
        );
    }
}

fn print_event_log(events: &[LifecycleEvent]) {
    for event in events {
        let detail = event.content_ref.as_deref().unwrap_or("-");
        println!(
            "  #{:<6} {:<14} {:<48} by {} at {} (tx {})",
            event.block_number,
            event.kind.event_name(),
            detail,
            event.actor,
            event.timestamp,
            event.tx_hash
        );
    }
}

/// One-line remediation hint derived from the core error class.
fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    let core = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<KeyledgerError>())?;
    let hint = match core.class() {
        ErrorClass::Crypto => "wrong password, or the blob was modified",
        ErrorClass::Ledger => match core {
            KeyledgerError::Unauthorized { .. } => {
                "only the key owner may rotate or revoke; check ledger.principal"
            }
            KeyledgerError::KeyRevoked(_) => "revoked keys cannot change state again",
            KeyledgerError::KeyAlreadyExists(_) => "pick a different key name",
            KeyledgerError::KeyNotFound(_) => "check the key name or id with `keyledger list`",
            _ => "the ledger rejected or could not record the transition",
        },
        ErrorClass::Store => match core {
            KeyledgerError::StoreUnavailable(_) => "the content store is unreachable; retry later",
            _ => "the stored blob is missing or damaged",
        },
        ErrorClass::Local => "check the configuration file and local paths",
    };
    Some(hint)
}
