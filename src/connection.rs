use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Result, SyncError};
use crate::protocol::{
    read_message, write_message, DiffResult, FileChunk, FileRecord, Message, Order,
};

/// A TCP stream speaking the framed protocol, with an optional per-frame
/// deadline.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    io_timeout: Option<Duration>,
}

impl Connection {
    pub async fn dial(endpoint: &str, io_timeout: Option<Duration>) -> Result<Self> {
        let connect = TcpStream::connect(endpoint);
        let stream = match io_timeout {
            Some(d) => timeout(d, connect).await.map_err(|_| SyncError::Timeout(d))?,
            None => connect.await,
        }
        .map_err(|source| SyncError::Connection {
            endpoint: endpoint.to_string(),
            source,
        })?;
        Self::from_stream(stream, io_timeout)
    }

    pub fn from_stream(stream: TcpStream, io_timeout: Option<Duration>) -> Result<Self> {
        let _ = stream.set_nodelay(true);
        let peer = stream.peer_addr()?;
        Ok(Self {
            stream,
            peer,
            io_timeout,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        let io_timeout = self.io_timeout;
        with_deadline(io_timeout, write_message(&mut self.stream, msg)).await
    }

    pub async fn recv(&mut self) -> Result<Message> {
        let io_timeout = self.io_timeout;
        with_deadline(io_timeout, read_message(&mut self.stream)).await
    }

    pub async fn send_order(&mut self, order: Order) -> Result<()> {
        self.send(&Message::Order(order)).await
    }

    pub async fn recv_order(&mut self) -> Result<Order> {
        self.recv().await?.into_order()
    }

    pub async fn recv_diff(&mut self) -> Result<DiffResult> {
        self.recv().await?.into_diff()
    }

    pub async fn recv_ack(&mut self) -> Result<FileRecord> {
        self.recv().await?.into_ack()
    }

    pub async fn recv_chunk(&mut self) -> Result<FileChunk> {
        self.recv().await?.into_chunk()
    }
}

async fn with_deadline<T>(
    io_timeout: Option<Duration>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match io_timeout {
        Some(d) => timeout(d, fut).await.map_err(|_| SyncError::Timeout(d))?,
        None => fut.await,
    }
}
