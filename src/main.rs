//! blobvault - operator tool for the blob storage core
//!
//! ```text
//! blobvault check --config storage.yaml   decode, validate, open every storage
//! blobvault sniff <FILE>                  classify a local file as a blob
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use blobvault::config::{Config, StorageConfig};
use blobvault::domain::{ContentAddress, HashAlgorithm};
use blobvault::sniff::BlobSniffer;
use blobvault::{open_storage, Error, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Content-addressed blob storage tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode and validate a configuration file, then open every storage it
    /// declares (running remote startup checks)
    Check {
        /// YAML configuration file
        #[arg(long, short, env = "BLOBVAULT_CONFIG")]
        config: PathBuf,

        /// Only decode and validate; do not contact any backend
        #[arg(long)]
        offline: bool,
    },

    /// Classify a local file the way blobs are classified on write
    Sniff {
        /// File to classify
        path: PathBuf,

        /// Digest algorithm for the blob's address
        #[arg(long, default_value = "sha224")]
        algorithm: String,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let result = match &args.command {
        Command::Check { config, offline } => check(config, *offline).await,
        Command::Sniff { path, algorithm } => sniff(path, algorithm).await,
    };
    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}

// =============================================================================
// Commands
// =============================================================================

async fn check(path: &Path, offline: bool) -> Result<()> {
    let text = tokio::fs::read_to_string(path).await?;
    let config: Config = serde_yaml::from_str(&text)
        .map_err(|e| Error::config(path.display().to_string(), e.to_string()))?;
    config.validate()?;
    info!(
        storages = config.storage.len(),
        syncs = config.sync.len(),
        "configuration is valid"
    );

    for sync in &config.sync {
        info!(
            from = %sync.from,
            to = %sync.to,
            verify_interval = ?sync.verify_interval,
            "sync declared"
        );
    }

    if offline {
        return Ok(());
    }
    for (name, storage) in &config.storage {
        open_named(name, storage).await?;
    }
    info!("all storages opened");
    Ok(())
}

async fn open_named(name: &str, storage: &StorageConfig) -> Result<()> {
    info!(storage = name, kind = storage.kind(), "opening storage");
    let backend = open_storage(storage).await?;
    let page = backend
        .enumerate_config()
        .map(|c| c.max_enumerate())
        .unwrap_or(0);
    info!(
        storage = name,
        sub_fetch = backend.as_sub_fetcher().is_some(),
        max_enumerate = page,
        "storage ready"
    );
    Ok(())
}

/// Sniffer verdict printed by `sniff`.
#[derive(Serialize)]
struct SniffReport {
    address: ContentAddress,
    size: u64,
    truncated: bool,
    mime_type: String,
    schema_type: String,
}

async fn sniff(path: &Path, algorithm: &str) -> Result<()> {
    let algorithm = HashAlgorithm::from_name(algorithm).ok_or_else(|| {
        Error::config("algorithm", format!("unsupported digest algorithm {:?}", algorithm))
    })?;
    let data = tokio::fs::read(path).await?;
    let address = ContentAddress::compute(algorithm, &data);

    let mut sniffer = BlobSniffer::new(address.clone());
    sniffer.write(&data);
    sniffer.parse();

    let report = SniffReport {
        address,
        size: sniffer.size(),
        truncated: sniffer.is_truncated(),
        mime_type: sniffer.mime_type().to_string(),
        schema_type: sniffer.class_tag().to_string(),
    };
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;
    println!("{}", json);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    // stdout carries command output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
