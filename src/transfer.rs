//! Client side: diff round trip and the push of new or modified files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::{
    catalog,
    config::{Config, RetryConfig},
    connection::Connection,
    error::{Result, SyncError},
    protocol::{ChunkReader, DiffResult, FileChunk, FileRecord, Message, Order, OrderKind},
};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub chunk_size: usize,
    pub io_timeout: Option<Duration>,
    pub retry: RetryConfig,
}

impl From<&Config> for ClientOptions {
    fn from(config: &Config) -> Self {
        Self {
            chunk_size: config.transfer.chunk_size,
            io_timeout: config.transfer.io_timeout(),
            retry: config.retry.clone(),
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// What a `copy_to` call changed on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Files named in REMOVE orders for server-only files. The server does
    /// not acknowledge removals, so these are requests, not confirmations.
    pub remove_requested: usize,
    /// Files acknowledged by the server.
    pub pushed: usize,
    pub bytes: u64,
    pub retries: u32,
}

async fn local_catalog(directory: &Path) -> Result<Vec<FileRecord>> {
    let dir = directory.to_path_buf();
    tokio::task::spawn_blocking(move || catalog::list(&dir))
        .await
        .map_err(std::io::Error::other)?
}

async fn request_diff(conn: &mut Connection, directory: &Path, tag: &str) -> Result<DiffResult> {
    let files = local_catalog(directory).await?;
    debug!("Local catalog of {} has {} files", directory.display(), files.len());
    conn.send_order(Order::new(OrderKind::Diff, tag, files)).await?;
    conn.recv_diff().await
}

/// Compares `directory` with the server copy of `tag` without changing anything.
pub async fn get_diff(
    endpoint: &str,
    directory: &Path,
    tag: &str,
    opts: &ClientOptions,
) -> Result<DiffResult> {
    let mut conn = Connection::dial(endpoint, opts.io_timeout).await?;
    request_diff(&mut conn, directory, tag).await
}

/// Makes the server copy of `tag` match `directory`.
///
/// Files only on the server are removed, modified files are removed and
/// pushed again, then new files are pushed. A failed push redials and
/// restarts that file from its first chunk.
pub async fn copy_to(
    endpoint: &str,
    directory: &Path,
    tag: &str,
    opts: &ClientOptions,
) -> Result<TransferReport> {
    let conn = Connection::dial(endpoint, opts.io_timeout).await?;
    let mut supervisor = Supervisor {
        endpoint,
        opts,
        conn,
    };
    let diff = request_diff(&mut supervisor.conn, directory, tag).await?;
    let mut report = TransferReport::default();

    if !diff.server_new.is_empty() {
        supervisor
            .conn
            .send_order(Order::new(OrderKind::Remove, tag, diff.server_new.clone()))
            .await?;
        for f in &diff.server_new {
            info!("REMOVE {}", f.path);
        }
        report.remove_requested += diff.server_new.len();
    }

    supervisor
        .conn
        .send_order(Order::new(OrderKind::Remove, tag, diff.modified.clone()))
        .await?;
    for f in &diff.modified {
        info!("REMOVE {}", f.path);
    }

    for f in diff.modified.iter().chain(&diff.client_new) {
        info!("PUSH {} ({})", f.path, f.hash_hex());
        let (bytes, retries) = supervisor.push(directory, tag, f).await?;
        report.pushed += 1;
        report.bytes += bytes;
        report.retries += retries;
    }

    Ok(report)
}

/// Owns the current connection and replaces it when a push fails.
struct Supervisor<'a> {
    endpoint: &'a str,
    opts: &'a ClientOptions,
    conn: Connection,
}

impl Supervisor<'_> {
    /// Pushes one file until it is acknowledged. Returns the bytes sent by
    /// the successful attempt and the number of retries it took.
    async fn push(&mut self, directory: &Path, tag: &str, file: &FileRecord) -> Result<(u64, u32)> {
        let mut retries = 0;
        loop {
            let chunk_size = self.opts.chunk_size;
            let err = match push_file(&mut self.conn, directory, file, tag, chunk_size).await {
                Ok(bytes) => return Ok((bytes, retries)),
                Err(e) => e,
            };
            if !self.opts.retry.allows(retries) {
                return Err(SyncError::RetriesExhausted {
                    path: file.path.clone(),
                    attempts: retries + 1,
                    last: Box::new(err),
                });
            }
            retries += 1;
            let delay = jittered(self.opts.retry.backoff(retries));
            warn!(
                "Push of {} failed: {}; redialing in {:?} (retry {})",
                file.path, err, delay, retries
            );
            tokio::time::sleep(delay).await;
            self.conn = Connection::dial(self.endpoint, self.opts.io_timeout).await?;
        }
    }
}

fn jittered(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms < 4 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=ms / 4))
}

/// Sends a FILE order for `file`, its chunk stream and the sentinel, then
/// waits for the acknowledgment. Returns the number of payload bytes sent.
pub async fn push_file(
    conn: &mut Connection,
    directory: &Path,
    file: &FileRecord,
    tag: &str,
    chunk_size: usize,
) -> Result<u64> {
    let source: PathBuf = directory.join(&file.path);
    let reader = tokio::fs::File::open(&source).await?;

    conn.send_order(Order::new(OrderKind::File, tag, vec![file.clone()]))
        .await?;

    let mut chunks = ChunkReader::new(reader, chunk_size);
    let mut sent = 0u64;
    while let Some(chunk) = chunks.next_chunk().await? {
        sent += chunk.data.len() as u64;
        conn.send(&Message::Chunk(chunk)).await?;
    }
    conn.send(&Message::Chunk(FileChunk::sentinel())).await?;

    let ack = conn.recv_ack().await?;
    if !ack.same_file(file) {
        return Err(SyncError::Validation(format!(
            "ack for {} while pushing {}",
            ack.path, file.path
        )));
    }
    debug!("{}: {} bytes acknowledged", file.path, sent);
    Ok(sent)
}
