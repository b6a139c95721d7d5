mod cli;
mod client;
mod table;

use anyhow::{Context, Result};
use clap::Parser;
use crate::cli::{Cli, Commands};
use crate::client::Client;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
        )
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.server)?;

    match cli.command {
        Commands::Ls { json } => {
            let reply = client.list().await.context("Failed to get list of VMs")?;

            if json {
                let out = serde_json::to_string(&reply).context("Failed to encode reply")?;
                println!("{}", out);
            } else {
                print!("{}", table::render(&reply.vms));
            }
        }
    }

    Ok(())
}
