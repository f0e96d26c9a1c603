//! Server side: accept loop and per-connection order handling.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    catalog,
    connection::Connection,
    diff::compute_diff,
    error::{Result, SyncError},
    protocol::{FileRecord, Message, Order, OrderKind},
    sandbox::TagRoot,
};

/// Advisory per-tag locks, keyed by the canonical tag directory so that
/// spellings like `t` and `./t/` exclude each other.
///
/// A FILE order keeps its tag locked while the chunks arrive. Without an
/// `io_timeout` a client that stops sending mid-stream therefore blocks every
/// later order on that tag, including its own retry on a new connection,
/// until the half-open socket is torn down.
#[derive(Clone, Default)]
pub struct TagLocks {
    inner: Arc<parking_lot::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

/// Holds one tag lock; the map entry is dropped with the last holder.
pub struct TagGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: PathBuf,
    locks: TagLocks,
}

impl TagLocks {
    pub async fn acquire(&self, dir: &Path) -> TagGuard {
        let lock = self
            .inner
            .lock()
            .entry(dir.to_path_buf())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        TagGuard {
            guard: Some(guard),
            key: dir.to_path_buf(),
            locks: self.clone(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Drop for TagGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.inner.lock();
        if map
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.key);
        }
    }
}

/// State shared by every session of one server.
pub struct ServerContext {
    basedir: PathBuf,
    io_timeout: Option<Duration>,
    locks: TagLocks,
}

impl ServerContext {
    pub fn new(basedir: impl Into<PathBuf>, io_timeout: Option<Duration>) -> Self {
        Self {
            basedir: basedir.into(),
            io_timeout,
            locks: TagLocks::default(),
        }
    }
}

pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
}

impl Server {
    pub async fn bind(addr: &str, ctx: ServerContext) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SyncError::Connection {
                endpoint: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            ctx: Arc::new(ctx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        info!(
            "Listening on {} (base directory {})",
            self.local_addr()?,
            self.ctx.basedir.display()
        );

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Cannot accept new connection: {}", e);
                    continue;
                }
            };
            let ctx = self.ctx.clone();
            tokio::spawn(
                async move {
                    let conn = match Connection::from_stream(stream, ctx.io_timeout) {
                        Ok(c) => c,
                        Err(e) => {
                            error!("Cannot set up connection: {}", e);
                            return;
                        }
                    };
                    if let Err(e) = handle_connection(conn, ctx).await {
                        error!("Session ended: {}", e);
                    }
                }
                .instrument(info_span!("session", %peer)),
            );
        }
    }
}

/// Runs one session: orders are read and handled strictly one after another
/// until the client closes the stream. Any failure ends the session.
pub async fn handle_connection(mut conn: Connection, ctx: Arc<ServerContext>) -> Result<()> {
    debug!("Accepted connection from {}", conn.peer());
    loop {
        let order = match conn.recv_order().await {
            Ok(order) => order,
            Err(e) if e.is_clean_close() => {
                debug!("Client closed the connection");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let kind = order.kind;
        if let Err(e) = dispatch(&mut conn, &ctx, order).await {
            debug!("{} failed: {}", kind, e);
            return Err(e);
        }
    }
}

/// Handles one order. The tag is validated before its lock is taken, and the
/// lock is held until the order is fully processed.
pub(crate) async fn dispatch(
    conn: &mut Connection,
    ctx: &ServerContext,
    order: Order,
) -> Result<()> {
    if matches!(order.kind, OrderKind::Put | OrderKind::Get) {
        warn!("{} on {:?} is not implemented, ignoring", order.kind, order.tag);
        return Ok(());
    }
    let root = TagRoot::new(&ctx.basedir, &order.tag)?;
    let _guard = ctx.locks.acquire(root.dir()).await;
    match order.kind {
        OrderKind::Diff => deal_with_diff(conn, &root, order).await,
        OrderKind::Remove => deal_with_remove(&root, order).await,
        OrderKind::File => deal_with_file(conn, &root, order).await,
        OrderKind::Put | OrderKind::Get => Ok(()),
    }
}

async fn deal_with_diff(conn: &mut Connection, root: &TagRoot, order: Order) -> Result<()> {
    info!("Diff on {}", order.tag);
    let dir = root.dir().to_path_buf();
    let server_files = tokio::task::spawn_blocking(move || list_tag(&dir))
        .await
        .map_err(std::io::Error::other)??;

    let diff = compute_diff(&server_files, &order.files);
    debug!(
        "Diff on {}: {} new here, {} new on client, {} modified",
        order.tag,
        diff.server_new.len(),
        diff.client_new.len(),
        diff.modified.len()
    );
    conn.send(&Message::Diff(diff)).await
}

/// Catalog of a tag directory; a tag that was never written is empty.
fn list_tag(dir: &Path) -> Result<Vec<FileRecord>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    catalog::list(dir)
}

async fn deal_with_remove(root: &TagRoot, order: Order) -> Result<()> {
    for f in &order.files {
        info!("Removing {}/{}", order.tag, f.path);
        let p = root.resolve(&f.path)?;
        fs::remove_file(&p).await.map_err(|e| {
            SyncError::Io(std::io::Error::new(
                e.kind(),
                format!("Cannot remove file {} {}: {}", order.tag, f.path, e),
            ))
        })?;
    }
    Ok(())
}

async fn deal_with_file(conn: &mut Connection, root: &TagRoot, order: Order) -> Result<()> {
    let file = match order.files.as_slice() {
        [file] => file,
        files => {
            return Err(SyncError::Validation(format!(
                "FILE order must name exactly one file, got {}",
                files.len()
            )))
        }
    };
    info!("File on {}/{}", order.tag, file.path);
    let written = receive_file(conn, root, file).await?;
    debug!("{}: {} bytes written", file.path, written);
    conn.send(&Message::Ack(file.clone())).await
}

/// Receives one chunk stream into `<tag>/<file.path>`.
///
/// The destination is truncated first, so a push restarted from chunk 1
/// replaces earlier bytes instead of appending to them. On any failure the
/// partial file is removed.
pub async fn receive_file(
    conn: &mut Connection,
    root: &TagRoot,
    file: &FileRecord,
) -> Result<u64> {
    let target = root.resolve(&file.path)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }

    let result = write_chunks(conn, &target, &file.name).await;
    if result.is_err() {
        if let Err(e) = fs::remove_file(&target).await {
            warn!("Cannot remove partial file {}: {}", target.display(), e);
        }
    }
    result
}

async fn write_chunks(conn: &mut Connection, target: &Path, name: &str) -> Result<u64> {
    let mut out = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(target)
        .await?;

    let mut written = 0u64;
    loop {
        let chunk = conn.recv_chunk().await?;
        if chunk.size == 0 {
            info!("{}: Skip (0)", name);
            continue;
        }
        if chunk.is_sentinel() {
            debug!("{}: Done", name);
            break;
        }
        if chunk.data.len() as i64 != chunk.size {
            return Err(SyncError::SizeMismatch {
                got: chunk.data.len(),
                wanted: chunk.size,
            });
        }
        out.write_all(&chunk.data).await?;
        written += chunk.data.len() as u64;
    }
    out.flush().await?;
    out.sync_all().await?;
    Ok(written)
}
