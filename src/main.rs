use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use relaybot::{Config, Daemon};

/// Relaybot - Discord and Telegram relay bot for LLM chat completions
#[derive(Parser)]
#[command(name = "relaybot", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,relaybot=info",
        1 => "info,relaybot=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing::info!(
        model = %config.model_name,
        discord = config.discord_token.is_some(),
        telegram = config.telegram_token.is_some(),
        "starting relaybot"
    );

    Daemon::new(config).run().await?;

    Ok(())
}
