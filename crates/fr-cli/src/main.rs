use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use fr_cli::commands::status;
use fr_cli::{Cli, Commands, Config, bot, shutdown};
use fr_feed::TimelineClient;

/// How long runtime shutdown waits for a pending console read.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Load config and open the ledger, ensuring the parent directory exists.
fn open_ledger(config_path: Option<&Path>) -> Result<(fr_db::Ledger, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create ledger directory")?;
    }

    let ledger = fr_db::Ledger::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    Ok((ledger, config))
}

fn run_bot(ledger: fr_db::Ledger, config: &Config) -> Result<()> {
    config.validate().context("invalid configuration")?;

    let token = config
        .feed_bearer_token
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "missing feed bearer token (set FEEDRELAY_FEED_BEARER_TOKEN or config.toml)"
            )
        })?;
    let source = TimelineClient::new(config.feed_api_base.as_str(), token, config.fetch_timeout())
        .context("failed to create feed client")?;

    let runtime = tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?;
    let result = runtime.block_on(async {
        let shutdown = shutdown::install_signal_handler();
        bot::run(
            config,
            ledger,
            source,
            BufReader::new(tokio::io::stdin()),
            std::io::stdout(),
            shutdown,
        )
        .await
    });
    // A console read blocked on stdin would otherwise keep the runtime alive.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    match &cli.command {
        Some(Commands::Run) => {
            let (ledger, config) = open_ledger(cli.config.as_deref())?;
            run_bot(ledger, &config)?;
        }
        Some(Commands::Status { recent }) => {
            let (ledger, config) = open_ledger(cli.config.as_deref())?;
            status::run(&mut std::io::stdout().lock(), &ledger, &config, *recent)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
