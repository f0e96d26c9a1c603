use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::{
    config::Config,
    session::{Server, ServerContext},
};

pub async fn run(port: u16, directory: PathBuf, config: &Config) -> Result<()> {
    let ctx = ServerContext::new(directory, config.transfer.io_timeout());
    let server = Server::bind(&format!("0.0.0.0:{}", port), ctx)
        .await
        .context("Cannot host")?;
    server.run().await.context("Cannot host")?;
    Ok(())
}
