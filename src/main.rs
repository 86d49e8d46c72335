//! gpg-bridge
//!
//! Command-line front end for the gpg bridge. Configuration comes from
//! `--config <file>` or the `GPG_BRIDGE_CONFIG` environment variable.

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gpg_bridge::{config::Config, Gpg};

#[derive(Parser, Debug)]
#[command(name = "gpg-bridge")]
#[command(about = "Run gpg and report its outcome in plain terms")]
struct Args {
    /// JSON configuration file (overrides GPG_BRIDGE_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decrypt a file and print its plaintext
    Decrypt { file: PathBuf },

    /// Decrypt a file into another file
    DecryptToFile { source: PathBuf, destination: PathBuf },

    /// Encrypt stdin into a file
    Encrypt {
        destination: PathBuf,
        /// Recipient key id or user id (repeatable)
        #[arg(short, long = "recipient")]
        recipients: Vec<String>,
    },

    /// Encrypt a file into another file
    EncryptFile {
        source: PathBuf,
        destination: PathBuf,
        /// Recipient key id or user id (repeatable)
        #[arg(short, long = "recipient")]
        recipients: Vec<String>,
    },

    /// Print the gpg version
    Version,

    /// Make sure gpg-agent is running and secret keys are available
    StartAgent,

    /// List available secret keys
    ListSecretKeys,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Log to stderr so stdout only carries command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    debug!(?config, "Loaded configuration");

    let gpg = Gpg::from_config(&config)
        .await
        .context("Failed to set up gpg")?;

    match args.command {
        Command::Decrypt { file } => {
            let plaintext = gpg.decrypt(&file).await?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(plaintext.as_bytes())?;
            stdout.flush()?;
        }
        Command::DecryptToFile {
            source,
            destination,
        } => {
            gpg.decrypt_to_file(&source, &destination).await?;
            info!(destination = %destination.display(), "Decrypted");
        }
        Command::Encrypt {
            destination,
            recipients,
        } => {
            let mut data = String::new();
            std::io::stdin()
                .read_to_string(&mut data)
                .context("Failed to read data from stdin")?;
            gpg.encrypt(&data, &destination, &recipients).await?;
            info!(destination = %destination.display(), "Encrypted");
        }
        Command::EncryptFile {
            source,
            destination,
            recipients,
        } => {
            gpg.encrypt_file(&source, &destination, &recipients).await?;
            info!(destination = %destination.display(), "Encrypted");
        }
        Command::Version => println!("{}", gpg.get_version().await?),
        Command::StartAgent => gpg.start_agent().await?,
        Command::ListSecretKeys => {
            for key in gpg.list_secret_keys().await? {
                println!("{}\t{}", key.key_id, key.user_id.unwrap_or_default());
            }
        }
    }

    Ok(())
}
