use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SyncError};
use crate::protocol::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub transfer: TransferConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransferConfig {
    pub chunk_size: usize,
    /// Deadline for a single frame read or write. Unset blocks forever.
    pub io_timeout_secs: Option<u64>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            io_timeout_secs: None,
        }
    }
}

impl TransferConfig {
    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_secs.map(Duration::from_secs)
    }
}

/// Redial policy for failed file pushes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries allowed per file after the first attempt.
    pub max_retries: u32,
    /// Ignore `max_retries` and keep redialing as long as the dial succeeds.
    pub unbounded: bool,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            unbounded: false,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn allows(&self, retries_done: u32) -> bool {
        self.unbounded || retries_done < self.max_retries
    }

    /// Exponential delay before retry number `retry` (1-based), capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl Config {
    /// `<config_dir>/dcp/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("dcp").join("config.toml"))
    }

    /// Loads `path` if given, else the default file when it exists, else
    /// the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };
        let text = std::fs::read_to_string(&path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let size = self.transfer.chunk_size;
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(SyncError::Config(format!(
                "chunk_size must be between 1 and {}, got {}",
                MAX_CHUNK_SIZE, size
            )));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(SyncError::Config(
                "initial_backoff_ms exceeds max_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let c = Config::parse("").unwrap();
        assert_eq!(c.transfer.chunk_size, 4096);
        assert_eq!(c.transfer.io_timeout(), None);
        assert_eq!(c.retry.max_retries, 5);
    }

    #[test]
    fn sections_override_defaults() {
        let c = Config::parse(
            r#"
            [transfer]
            chunk_size = 8192
            io_timeout_secs = 30

            [retry]
            max_retries = 2
            "#,
        )
        .unwrap();
        assert_eq!(c.transfer.chunk_size, 8192);
        assert_eq!(c.transfer.io_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(c.retry.max_retries, 2);
        assert_eq!(c.retry.initial_backoff_ms, 100);
    }

    #[test]
    fn rejects_zero_chunk_size_and_unknown_keys() {
        assert!(Config::parse("[transfer]\nchunk_size = 0\n").is_err());
        assert!(Config::parse("[transfer]\nchunksize = 10\n").is_err());
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let r = RetryConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
            ..Default::default()
        };
        assert_eq!(r.backoff(1), Duration::from_millis(100));
        assert_eq!(r.backoff(2), Duration::from_millis(200));
        assert_eq!(r.backoff(3), Duration::from_millis(350));
        assert_eq!(r.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn retry_limit() {
        let mut r = RetryConfig {
            max_retries: 2,
            ..Default::default()
        };
        assert!(r.allows(0));
        assert!(r.allows(1));
        assert!(!r.allows(2));
        r.unbounded = true;
        assert!(r.allows(1000));
    }
}
