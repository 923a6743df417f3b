//! relaychat CLI — operator commands for the chat backend core.
//!
//! Usage:
//!   relaychat models                — List models across configured providers
//!   relaychat probe <provider>      — Validate an API key against a provider
//!   relaychat vault gen             — Generate a new vault key
//!   relaychat vault encrypt         — Encrypt a credential with the vault key

use std::io::{self, BufRead};

use anyhow::Result;
use clap::{Parser, Subcommand};

use relaychat_core::catalog::ModelFilter;
use relaychat_core::config::ServiceConfig;
use relaychat_core::credentials::{HttpKeyProbe, KeyProbe};
use relaychat_core::provider::client::ProviderClient;
use relaychat_core::provider::ProviderKey;
use relaychat_core::vault::{self, Vault};

#[derive(Parser)]
#[command(
    name = "relaychat",
    version,
    about = "Multi-provider chat completion backend — operator tools"
)]
struct Cli {
    /// Path to the service config file
    #[arg(short, long, default_value = "relaychat.json")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available models across every provider configured in the file
    Models {
        /// Restrict to one provider
        #[arg(short, long)]
        provider: Option<ProviderKey>,

        /// Free-text filter over name, id, description, and metadata
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Validate an API key against a provider (key read from stdin)
    Probe {
        provider: ProviderKey,

        /// Override the provider's base URL
        #[arg(short, long)]
        base_url: Option<String>,
    },

    /// Vault key management
    Vault {
        #[command(subcommand)]
        action: VaultCommands,
    },
}

#[derive(Subcommand)]
enum VaultCommands {
    /// Generate a fresh vault key and print it base64-encoded
    Gen,
    /// Encrypt a credential read from stdin with the configured vault key
    Encrypt,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig::load(&cli.config)?;

    match cli.command {
        Commands::Models { provider, query } => cmd_models(&config, provider, query).await?,
        Commands::Probe { provider, base_url } => {
            cmd_probe(&config, provider, base_url.as_deref()).await?
        }
        Commands::Vault { action } => cmd_vault(&config, action)?,
    }

    Ok(())
}

// ── Commands ────────────────────────────────────────────────────────

async fn cmd_models(
    config: &ServiceConfig,
    only: Option<ProviderKey>,
    query: Option<String>,
) -> Result<()> {
    let providers: Vec<ProviderKey> = match only {
        Some(p) => vec![p],
        None => ProviderKey::well_known()
            .into_iter()
            .filter(|p| config.provider_settings(*p).is_some())
            .collect(),
    };
    if providers.is_empty() {
        anyhow::bail!(
            "no providers configured — add entries under \"providers\" in the config file \
             or pass --provider"
        );
    }

    let filter = ModelFilter {
        query,
        ..Default::default()
    };

    for provider in providers {
        let client = ProviderClient::new(
            provider,
            None,
            None,
            None,
            config.provider_settings(provider),
        );
        let models = client.list_models().await;
        let matched: Vec<_> = models.iter().filter(|m| filter.matches(m)).collect();

        println!("{provider} ({} models)", matched.len());
        for model in matched {
            match model.context_window {
                Some(window) => println!("  {}  [{window} ctx]", model.id),
                None => println!("  {}", model.id),
            }
        }
    }
    Ok(())
}

async fn cmd_probe(
    config: &ServiceConfig,
    provider: ProviderKey,
    base_url: Option<&str>,
) -> Result<()> {
    let api_key = read_secret("API key")?;
    let base = base_url
        .or_else(|| {
            config
                .provider_settings(provider)
                .and_then(|s| s.base_url.as_deref())
        })
        .unwrap_or_else(|| provider.default_base_url());

    let probe = HttpKeyProbe::new(config.request_timeout());
    match probe.probe(provider, base, &api_key).await {
        Ok(()) => {
            println!("✅ {provider}: key accepted ({base})");
            Ok(())
        }
        Err(e) => anyhow::bail!("{provider}: {e}"),
    }
}

fn cmd_vault(config: &ServiceConfig, action: VaultCommands) -> Result<()> {
    match action {
        VaultCommands::Gen => {
            let (_, encoded) = Vault::generate();
            println!("{encoded}");
            eprintln!("Export it as RELAYCHAT_VAULT_KEY or set vaultKey in the config file.");
        }
        VaultCommands::Encrypt => {
            let vault = config.vault()?;
            let plaintext = read_secret("credential")?;
            let ciphertext = vault.encrypt(&plaintext)?;
            println!("{ciphertext}");
            eprintln!("preview: {}", vault::mask(&plaintext));
        }
    }
    Ok(())
}

/// Read one secret line from stdin so it never lands in shell history.
fn read_secret(what: &str) -> Result<String> {
    eprintln!("Paste the {what} and press Enter:");
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let secret = line.trim().to_string();
    if secret.is_empty() {
        anyhow::bail!("no {what} provided");
    }
    Ok(secret)
}
