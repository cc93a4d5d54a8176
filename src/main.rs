//! Taxonomy sync CLI
//!
//! Provisions a mailbox from a request file and prints the result as JSON.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

use mailbox_taxonomy::config;
use mailbox_taxonomy::services::{ProvisionRequest, ProvisioningService};
use mailbox_taxonomy::store;
use mailbox_taxonomy::{Result, TaxonomyError};

/// Provision business label taxonomies in Gmail and Outlook mailboxes
#[derive(Parser, Debug)]
#[command(name = "taxonomy-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or update the label taxonomy described by a request file
    Provision {
        /// Request file in TOML or JSON
        request: PathBuf,

        /// OAuth access token for the mailbox
        #[arg(long, env = "TAXONOMY_ACCESS_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Print the composed routing keys without touching the mailbox
        #[arg(long)]
        dry_run: bool,
    },

    /// Detect which provider hosts an email address
    Detect { email: String },

    /// List bundled business types
    BusinessTypes,
}

#[tokio::main]
async fn main() {
    mailbox_taxonomy::init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    match &cli.config {
        Some(path) => config::init_config_from_path(path)?,
        None => config::init_config()?,
    }
    let config = config::get_config()?;

    match cli.command {
        Commands::BusinessTypes => {
            for name in label_templates::business_types()? {
                println!("{}", name);
            }
            Ok(0)
        }
        Commands::Detect { email } => {
            let service = ProvisioningService::new(store::in_memory_pool()?, config);
            let detection = service.detect(&email).await?;
            println!("{}", serde_json::to_string_pretty(&detection)?);
            Ok(0)
        }
        Commands::Provision {
            request,
            token,
            dry_run,
        } => {
            let request = read_request(&request)?;

            if dry_run {
                let service = ProvisioningService::new(store::in_memory_pool()?, config);
                let tree = service.preview(&request)?;
                for key in tree.flattened_keys() {
                    println!("{}", key);
                }
                return Ok(0);
            }

            let token = token.ok_or_else(|| {
                TaxonomyError::AuthExpired("Set TAXONOMY_ACCESS_TOKEN or pass --token".to_string())
            })?;
            let pool = store::create_pool(&config.storage.resolve_db_path())?;

            let (sender, receiver) = flume::unbounded();
            let service = Arc::new(ProvisioningService::new(pool, config).with_events(sender));
            tokio::spawn(async move {
                while let Ok(event) = receiver.recv_async().await {
                    debug!("{:?}", event);
                }
            });

            let signalled = service.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    signalled.cancel_all();
                }
            });

            let result = service.provision_with_token(&request, &token).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.success { 0 } else { 2 })
        }
    }
}

fn read_request(path: &Path) -> Result<ProvisionRequest> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(serde_json::from_str(&content)?),
        _ => toml::from_str(&content)
            .map_err(|e| TaxonomyError::InvalidInput(format!("Invalid request file: {}", e))),
    }
}
