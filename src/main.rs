use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::Cli;

mod catalog;
mod cli;
mod config;
mod connection;
mod diff;
mod error;
mod protocol;
mod sandbox;
mod session;
mod transfer;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if let Err(e) = cli.run().await {
        println!("{:#}", e);
        std::process::exit(1);
    }
}
