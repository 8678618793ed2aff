//! Raffle CLI - connect a wallet and enter the DeFi Lottery from the terminal.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use raffle::config::{config_path, load_config};
use raffle::deeplink::Platform;
use raffle_cli::{App, Backend};
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use url::Url;

/// Raffle CLI - DeFi Lottery wallet and entrance
#[derive(Parser, Debug)]
#[command(name = "raffle")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    command: Command,

    /// Use simulated wallets and an in-memory raffle
    #[arg(long)]
    simulate: bool,

    /// JSON-RPC endpoint (overrides the config file)
    #[arg(long, env = "RAFFLE_RPC_URL")]
    rpc_url: Option<String>,

    /// Raffle contract address (overrides the config file)
    #[arg(long, env = "RAFFLE_ADDRESS")]
    raffle: Option<String>,

    /// Config file path (defaults to ~/.raffle/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Browser user agent used for mobile wallet routing
    #[arg(long, default_value = "")]
    user_agent: String,

    /// Page the wallet deep links return to
    #[arg(long, default_value = "http://localhost:5173/")]
    page_url: Url,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the wallets that can be connected
    Wallets,
    /// Connect a wallet by connector id
    Connect {
        /// Connector id, as printed by `wallets`
        id: String,
    },
    /// Show the connection status
    Status,
    /// Show the raffle state
    Raffle,
    /// Enter the raffle
    Enter {
        /// Number of entries (1-10)
        #[arg(short, long, default_value_t = 1)]
        entries: u32,
    },
    /// Disconnect the wallet
    Disconnect,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("raffle=debug,raffle_cli=debug")
    } else {
        EnvFilter::new("raffle=warn,raffle_cli=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let path = args.config.clone().unwrap_or_else(config_path);
    let mut config = load_config(&path)?;
    if let Some(rpc_url) = args.rpc_url {
        config.rpc_url = rpc_url;
    }
    if let Some(raffle) = args.raffle {
        config.raffle_address = raffle;
    }
    config.validate()?;

    let backend = if args.simulate {
        Backend::Simulated
    } else {
        Backend::Rpc {
            rpc_url: config.rpc_url.clone(),
        }
    };
    let platform = Platform::from_user_agent(&args.user_agent);
    let app = App::new(&backend, &config, platform, args.page_url).await?;

    if !matches!(args.command, Command::Wallets) {
        app.restore().await;
    }

    match args.command {
        Command::Wallets => app.wallets(),
        Command::Connect { id } => app.connect(&id).await?,
        Command::Status => app.status(),
        Command::Raffle => app.raffle().await?,
        Command::Enter { entries } => app.enter(entries).await?,
        Command::Disconnect => app.disconnect().await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    tokio::select! {
        result = run(args) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            Ok(())
        }
    }
}
