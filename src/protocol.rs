//! Wire types and the framed codec shared by client and server.
//!
//! Every frame is a 4-byte big-endian length followed by a postcard encoded
//! [`Message`]. The envelope variant tells the decoder which shape follows,
//! so a reader expecting a diff result never mistakes a chunk for one.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, SyncError};

/// Reference payload length of a data chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024;

/// Largest chunk payload a peer may be configured with.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Upper bound on a single frame, checked before allocating the read buffer.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// 128-bit MD5 content digest.
pub type Digest = [u8; 16];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Base name of the file.
    pub name: String,
    pub hash: Digest,
    /// Slash separated path relative to the root that was listed.
    pub path: String,
    pub size: u64,
}

impl FileRecord {
    /// Identity used when comparing two catalogs.
    pub fn same_file(&self, other: &FileRecord) -> bool {
        self.name == other.name && self.path == other.path
    }

    pub fn hash_hex(&self) -> String {
        self.hash.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Diff,
    Put,
    Get,
    Remove,
    File,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderKind::Diff => "DIFF",
            OrderKind::Put => "PUT",
            OrderKind::Get => "GET",
            OrderKind::Remove => "REMOVE",
            OrderKind::File => "FILE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub kind: OrderKind,
    /// Sub-tree of the server base directory the order applies to.
    pub tag: String,
    pub files: Vec<FileRecord>,
}

impl Order {
    pub fn new(kind: OrderKind, tag: impl Into<String>, files: Vec<FileRecord>) -> Self {
        Self {
            kind,
            tag: tag.into(),
            files,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    /// Present only on the side that sent the DIFF order.
    pub client_new: Vec<FileRecord>,
    /// Present only on the side that answered it.
    pub server_new: Vec<FileRecord>,
    /// Present on both sides with different digests (server copy).
    pub modified: Vec<FileRecord>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.client_new.is_empty() && self.server_new.is_empty() && self.modified.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    /// 1-based position in the stream, informational only.
    pub id: u64,
    pub data: Vec<u8>,
    /// Payload length, `-1` for the end-of-file sentinel.
    pub size: i64,
}

impl FileChunk {
    pub fn data(id: u64, data: Vec<u8>) -> Self {
        let size = data.len() as i64;
        Self { id, data, size }
    }

    pub fn sentinel() -> Self {
        Self {
            id: 0,
            data: Vec::new(),
            size: -1,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.size < 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Order(Order),
    Diff(DiffResult),
    /// Acknowledges a received file by echoing its record.
    Ack(FileRecord),
    Chunk(FileChunk),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Order(_) => "order",
            Message::Diff(_) => "diff",
            Message::Ack(_) => "ack",
            Message::Chunk(_) => "chunk",
        }
    }

    pub fn into_order(self) -> Result<Order> {
        match self {
            Message::Order(o) => Ok(o),
            other => Err(unexpected("order", &other)),
        }
    }

    pub fn into_diff(self) -> Result<DiffResult> {
        match self {
            Message::Diff(d) => Ok(d),
            other => Err(unexpected("diff", &other)),
        }
    }

    pub fn into_ack(self) -> Result<FileRecord> {
        match self {
            Message::Ack(f) => Ok(f),
            other => Err(unexpected("ack", &other)),
        }
    }

    pub fn into_chunk(self) -> Result<FileChunk> {
        match self {
            Message::Chunk(c) => Ok(c),
            other => Err(unexpected("chunk", &other)),
        }
    }
}

fn unexpected(expected: &'static str, got: &Message) -> SyncError {
    SyncError::UnexpectedMessage {
        expected,
        got: got.kind(),
    }
}

pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> Result<()> {
    let data = postcard::to_stdvec(msg).map_err(SyncError::Encode)?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(SyncError::FrameTooLarge {
            size: data.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    writer.write_u32(data.len() as u32).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads exactly one frame. End of stream before the length prefix is
/// reported as [`SyncError::Closed`].
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(SyncError::Closed),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_SIZE {
        return Err(SyncError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    postcard::from_bytes(&buf).map_err(SyncError::Decode)
}

/// Splits a byte source into data chunks of at most `chunk_size` bytes.
pub struct ChunkReader<R> {
    reader: R,
    chunk_size: usize,
    next_id: u64,
    done: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            next_id: 1,
            done: false,
        }
    }

    /// Returns the next data chunk, or `None` once the source is exhausted.
    /// Only the last chunk may be shorter than `chunk_size`.
    pub async fn next_chunk(&mut self) -> Result<Option<FileChunk>> {
        if self.done {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.done = true;
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        let chunk = FileChunk::data(self.next_id, buf);
        self.next_id += 1;
        Ok(Some(chunk))
    }
}
