use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot connect to {endpoint}: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    /// The peer closed the stream between two frames.
    #[error("Connection closed by peer")]
    Closed,
    #[error("Encoding error: {0}")]
    Encode(#[source] postcard::Error),
    #[error("Decoding error: {0}")]
    Decode(#[source] postcard::Error),
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("Unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Path {path:?} escapes {root:?}")]
    PathEscape { path: String, root: String },
    #[error("Received {got} bytes, wanted {wanted}")]
    SizeMismatch { got: usize, wanted: i64 },
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Giving up on {path} after {attempts} attempts: {last}")]
    RetriesExhausted {
        path: String,
        attempts: u32,
        #[source]
        last: Box<SyncError>,
    },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn is_clean_close(&self) -> bool {
        matches!(self, SyncError::Closed)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
