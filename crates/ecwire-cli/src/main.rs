//! ecwire CLI
//!
//! Encrypted point-to-point messaging over TCP.

use clap::Parser;
use tracing::{info, warn};

use ecwire_cli::cli::{Cli, Command};
use ecwire_cli::{ca_cmd, net_cmd};
use ecwire_core::config::load_config;
use ecwire_core::tracing_init::{default_filter, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    cli.apply_globals(&mut config);
    if let Command::Serve(args) | Command::Connect(args) = &cli.command {
        args.apply(&mut config);
    }
    config.validate()?;

    init_tracing(&default_filter(&config.logging.level), config.logging.json);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting ecwire");

    match &cli.command {
        Command::Serve(_) => {
            net_cmd::run_serve(&config, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
                info!("Received shutdown signal");
            })
            .await
        }
        Command::Connect(_) => net_cmd::run_connect(&config).await,
        Command::Ca(args) => ca_cmd::run(args),
        Command::Config => print_config(&config),
    }
}

#[allow(clippy::print_stdout)]
fn print_config(config: &ecwire_core::Config) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
