use anyhow::Result;
use std::path::Path;

use crate::{
    config::Config,
    transfer::{copy_to, ClientOptions},
};

pub async fn run(uri: &str, directory: &Path, tag: &str, config: &Config) -> Result<()> {
    let report = copy_to(uri, directory, tag, &ClientOptions::from(config)).await?;
    println!(
        "Requested removal of {} files, pushed {} files ({} bytes, {} retries)",
        report.remove_requested, report.pushed, report.bytes, report.retries
    );
    Ok(())
}
