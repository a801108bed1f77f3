// src/main.rs
// convolink - conversation linking engine for an LLM-proxy telemetry store

use anyhow::Result;
use clap::Parser;
use convolink::cli::{Cli, Commands};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env from ~/.convolink/.env only, never from CWD.
    if let Some(home) = dirs::home_dir() {
        if let Err(e) = dotenvy::from_path(home.join(".convolink/.env")) {
            tracing::debug!("failed to load global .env file: {}", e);
        }
    }

    let cli = Cli::parse();

    // rebuild/verify run interactively and want visible progress; link runs
    // inline in the proxy's hot path and should stay quiet by default.
    let log_level = match &cli.command {
        Commands::Link { .. } => Level::WARN,
        Commands::Rebuild { .. } => Level::INFO,
        Commands::Verify { .. } => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        Commands::Link { db } => convolink::cli::link::run(db).await?,
        Commands::Rebuild {
            dry_run,
            domain,
            limit,
            batch_size,
            db,
        } => convolink::cli::rebuild::run(dry_run, domain, limit, batch_size, db).await?,
        Commands::Verify { domain, db } => convolink::cli::verify::run(domain, db).await?,
    }

    Ok(())
}
