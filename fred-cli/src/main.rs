use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fred_core::config::Config;
use fred_core::core_store::StoreService;
use fred_core::core_types::{Item, KeygroupName};
use fred_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use fred_core::metrics::init_metrics;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fred")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate a node configuration file
    Check {
        /// Path to the TOML configuration
        path: PathBuf,
    },

    /// Print the configuration assembled from FRED_* environment variables
    Env,

    /// Write the default configuration
    Init {
        /// Destination file; prints to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn describe(config: &Config) {
    let node = config.own_node();
    info!(node = %node, backend = ?config.store.backend, "Node configuration is valid");
    match config.replication.default_expiry {
        Some(expiry) => info!("Keygroups created without expiry keep rows for {:?}", expiry),
        None => info!("Keygroups created without expiry keep rows forever"),
    }
}

/// Write and read back one item through the configured backend.
async fn check_store(config: &Config) -> Result<()> {
    let store = StoreService::new(config.node.id.clone(), config.open_store());
    let keygroup = KeygroupName::new("fredcheck")?;

    store.create_keygroup(&keygroup).await?;
    let version = store.update(&Item::new(keygroup.clone(), "check", b"ok".to_vec()), None).await?;
    let items = store.read(&keygroup, "check").await?;
    anyhow::ensure!(
        items.iter().any(|item| item.version == version),
        "backend {:?} did not return the version it stored",
        config.store.backend
    );
    store.delete_keygroup(&keygroup).await?;

    info!(backend = ?config.store.backend, "Store accepted a test write");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log_level.parse::<LogLevel>().unwrap_or_else(|e| {
        eprintln!("{e}, using 'info'");
        LogLevel::Info
    });
    init_logging_with_config(LogConfig::new(log_level).json_format(args.json_logs))?;
    init_metrics();

    match args.command {
        Some(Command::Check { path }) => {
            let config = Config::from_file(&path)
                .with_context(|| format!("loading {}", path.display()))?;
            describe(&config);
            check_store(&config).await.context("checking the configured store")?;
        }
        Some(Command::Env) => {
            let config = Config::from_env().context("reading FRED_* environment")?;
            describe(&config);
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Some(Command::Init { output }) => {
            let config = Config::default();
            match output {
                Some(path) => {
                    if path.exists() {
                        warn!("Overwriting {}", path.display());
                    }
                    config
                        .save_to_file(&path)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!("Wrote default configuration to {}", path.display());
                }
                None => print!("{}", toml::to_string_pretty(&config)?),
            }
        }
        None => {
            info!("No command specified. Use --help for usage information.");
        }
    }

    Ok(())
}
