//! Domain-specific error types for MirrorDesk.
//!
//! All fallible operations return `Result<T, MirrorError>`.
//! Protocol and stream-parsing errors are recoverable by ending the
//! current unit of work; only session-level faults are surfaced to a
//! device's observable state.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for MirrorDesk.
#[derive(Debug, Error)]
pub enum MirrorError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// Fewer than 12 bytes were available for a stream header.
    #[error("malformed stream header: need 12 bytes, got {0}")]
    MalformedHeader(usize),

    /// Fewer than 12 bytes were available for a frame record's metadata.
    #[error("malformed frame metadata: need 12 bytes, got {0}")]
    MalformedFrameMeta(usize),

    /// A frame record announced a payload larger than the reader accepts.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The source stream closed, cleanly or not.
    #[error("stream ended")]
    StreamEnded,

    // ── Process / Transport Errors ───────────────────────────────
    /// The external capture process could not be launched or died.
    #[error("subprocess failure: {0}")]
    Subprocess(String),

    /// The byte-stream transport reported an error.
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Media Errors ─────────────────────────────────────────────
    /// The hardware encoder rejected a request.
    #[error("encoder error: {0}")]
    Encoder(String),

    /// A received image could not be decoded.
    #[error("image decode failed: {0}")]
    ImageDecode(String),

    /// A compressed video picture could not be decoded.
    #[error("video decode failed: {0}")]
    VideoDecode(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl MirrorError {
    /// Whether this error only means "the stream is over".
    ///
    /// Truncated protocol reads are reported as stream end, never as
    /// distinct faults.
    pub fn is_stream_end(&self) -> bool {
        match self {
            MirrorError::StreamEnded
            | MirrorError::MalformedHeader(_)
            | MirrorError::MalformedFrameMeta(_) => true,
            MirrorError::Transport(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }

    /// Whether the peer went away while we were writing to it.
    pub fn is_disconnect(&self) -> bool {
        use std::io::ErrorKind;
        match self {
            MirrorError::Transport(e) => matches!(
                e.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::WriteZero
                    | ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for MirrorError {
    fn from(s: String) -> Self {
        MirrorError::Other(s)
    }
}

impl From<&str> for MirrorError {
    fn from(s: &str) -> Self {
        MirrorError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for MirrorError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        MirrorError::ChannelClosed
    }
}

impl From<tokio::time::error::Elapsed> for MirrorError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        MirrorError::Timeout(Duration::ZERO)
    }
}
