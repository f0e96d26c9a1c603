use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

mod copyto;
mod diff;
mod listen;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log every file operation
    #[arg(short, long, global = true)]
    pub verbose: bool,
    /// Config file, defaults to <config dir>/dcp/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve tagged directories under a base directory
    Listen {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// Base directory holding one sub-directory per tag
        #[arg(long)]
        directory: Option<PathBuf>,
        /// Read/write deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Make the remote copy of a tag match a local directory
    Copyto {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        transfer: TransferArgs,
    },
    /// Show what copyto would change
    Diff {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        transfer: TransferArgs,
    },
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Destination endpoint, host:port
    #[arg(long)]
    uri: Option<String>,
    /// Local directory to compare
    #[arg(long)]
    directory: Option<PathBuf>,
    /// Directory tag on the remote side
    #[arg(long)]
    tag: Option<String>,
}

impl TargetArgs {
    fn require(self) -> Result<(String, PathBuf, String)> {
        let directory = required(
            self.directory.filter(|d| !d.as_os_str().is_empty()),
            "Directory not specified",
        )?;
        let uri = required(self.uri.filter(|u| !u.is_empty()), "Target endpoint not specified")?;
        let tag = required(self.tag.filter(|t| !t.is_empty()), "Directory tag not specified")?;
        Ok((uri, directory, tag))
    }
}

#[derive(Args, Debug, Default)]
struct TransferArgs {
    /// Maximum payload of one file chunk in bytes
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Retries per file before giving up
    #[arg(long)]
    max_retries: Option<u32>,
    /// Keep redialing failed pushes without limit
    #[arg(long)]
    retry_forever: bool,
    /// Read/write deadline in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl TransferArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(size) = self.chunk_size {
            config.transfer.chunk_size = size;
        }
        if let Some(n) = self.max_retries {
            config.retry.max_retries = n;
        }
        if self.retry_forever {
            config.retry.unbounded = true;
        }
        if self.timeout.is_some() {
            config.transfer.io_timeout_secs = self.timeout;
        }
    }
}

fn required<T>(value: Option<T>, message: &str) -> Result<T> {
    value.ok_or_else(|| anyhow!("{}", message))
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let mut config = Config::load(self.config.as_deref())?;
        match self.command {
            Commands::Listen {
                port,
                directory,
                timeout,
            } => {
                let port = required(port, "Port not specified")?;
                let directory = required(
                    directory.filter(|d| !d.as_os_str().is_empty()),
                    "Base directory not specified",
                )?;
                if timeout.is_some() {
                    config.transfer.io_timeout_secs = timeout;
                }
                listen::run(port, directory, &config).await?
            }
            Commands::Copyto { target, transfer } => {
                let (uri, directory, tag) = target.require()?;
                transfer.apply(&mut config);
                config.validate()?;
                copyto::run(&uri, &directory, &tag, &config).await?
            }
            Commands::Diff { target, transfer } => {
                let (uri, directory, tag) = target.require()?;
                transfer.apply(&mut config);
                config.validate()?;
                diff::run(&uri, &directory, &tag, &config).await?
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_copyto_flags() {
        let cli = Cli::try_parse_from([
            "dcp", "copyto", "--uri", "host:7000", "--directory", "/tmp/x", "--tag", "t",
            "--chunk-size", "8192", "--retry-forever",
        ])
        .unwrap();
        match cli.command {
            Commands::Copyto { target, transfer } => {
                let (uri, dir, tag) = target.require().unwrap();
                assert_eq!(uri, "host:7000");
                assert_eq!(dir, PathBuf::from("/tmp/x"));
                assert_eq!(tag, "t");
                let mut config = Config::default();
                transfer.apply(&mut config);
                assert_eq!(config.transfer.chunk_size, 8192);
                assert!(config.retry.unbounded);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn missing_flags_name_what_is_missing() {
        let cli = Cli::try_parse_from(["dcp", "diff", "--uri", "h:1", "--directory", "d"]).unwrap();
        let Commands::Diff { target, .. } = cli.command else {
            panic!("expected diff");
        };
        let err = target.require().unwrap_err();
        assert_eq!(err.to_string(), "Directory tag not specified");
    }

    #[test]
    fn empty_directory_counts_as_missing() {
        let parsed = Cli::try_parse_from([
            "dcp", "copyto", "--uri", "h:1", "--directory", "", "--tag", "t",
        ]);
        assert!(parsed.is_err());

        let target = TargetArgs {
            uri: Some("h:1".into()),
            directory: Some(PathBuf::new()),
            tag: Some("t".into()),
        };
        let err = target.require().unwrap_err();
        assert_eq!(err.to_string(), "Directory not specified");
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::try_parse_from(["dcp", "listen", "--port", "7000", "-v"]).unwrap();
        assert!(cli.verbose);
    }
}
