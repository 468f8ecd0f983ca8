//! Framed stream I/O for the capture protocol.
//!
//! [`MirrorCodec`] turns a byte stream into [`StreamItem`]s for use
//! with `tokio_util::codec::FramedRead`. The `write_*` helpers are
//! what the device side uses to put a session on the wire; payloads
//! are written in chunks of at most [`WRITE_CHUNK_SIZE`] bytes.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::MirrorError;
use crate::protocol::frame::{FRAME_META_SIZE, FrameKind, FrameMeta, FrameRecord};
use crate::protocol::header::{HEADER_SIZE, StreamHeader};

/// Largest slice handed to a single transport write.
pub const WRITE_CHUNK_SIZE: usize = 64 * 1024;

/// Default upper bound on an accepted frame payload.
pub const DEFAULT_MAX_PAYLOAD: usize = 32 * 1024 * 1024;

// ── StreamItem ───────────────────────────────────────────────────

/// One decoded unit of a capture stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// Always first, exactly once.
    Header(StreamHeader),
    Frame(FrameRecord),
}

// ── MirrorCodec ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    SyncByte,
    Header,
    Meta,
    Payload(FrameMeta),
}

/// Decoder (and encoder) for the header + frame-record stream.
#[derive(Debug)]
pub struct MirrorCodec {
    state: ReadState,
    max_payload: usize,
}

impl MirrorCodec {
    /// A codec for a stream that starts directly with the header.
    pub fn new() -> Self {
        Self {
            state: ReadState::Header,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// A codec for a stream prefixed by the one-byte sync marker.
    pub fn with_sync_byte() -> Self {
        Self {
            state: ReadState::SyncByte,
            ..Self::new()
        }
    }

    /// Override the payload size limit.
    pub fn max_payload(mut self, max: usize) -> Self {
        self.max_payload = max;
        self
    }
}

impl Default for MirrorCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl tokio_util::codec::Decoder for MirrorCodec {
    type Item = StreamItem;
    type Error = MirrorError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                ReadState::SyncByte => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    src.advance(1);
                    self.state = ReadState::Header;
                }
                ReadState::Header => {
                    if src.len() < HEADER_SIZE {
                        return Ok(None);
                    }
                    let header = StreamHeader::decode(&src[..HEADER_SIZE])?;
                    src.advance(HEADER_SIZE);
                    self.state = ReadState::Meta;
                    return Ok(Some(StreamItem::Header(header)));
                }
                ReadState::Meta => {
                    if src.len() < FRAME_META_SIZE {
                        return Ok(None);
                    }
                    let meta = FrameMeta::decode(&src[..FRAME_META_SIZE])?;
                    let len = meta.payload_len as usize;
                    if len > self.max_payload {
                        return Err(MirrorError::PayloadTooLarge {
                            size: len,
                            max: self.max_payload,
                        });
                    }
                    src.advance(FRAME_META_SIZE);
                    src.reserve(len.saturating_sub(src.len()));
                    self.state = ReadState::Payload(meta);
                }
                ReadState::Payload(meta) => {
                    let len = meta.payload_len as usize;
                    if src.len() < len {
                        return Ok(None);
                    }
                    let payload = src.split_to(len).freeze();
                    self.state = ReadState::Meta;
                    return Ok(Some(StreamItem::Frame(FrameRecord::new(meta.kind, payload))));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if src.is_empty() && !matches!(self.state, ReadState::Payload(_)) {
            return Ok(None);
        }
        let leftover = src.len();
        src.clear();
        match self.state {
            ReadState::SyncByte => Ok(None),
            ReadState::Header => Err(MirrorError::MalformedHeader(leftover)),
            ReadState::Meta => Err(MirrorError::MalformedFrameMeta(leftover)),
            ReadState::Payload(_) => Err(MirrorError::StreamEnded),
        }
    }
}

impl tokio_util::codec::Encoder<StreamItem> for MirrorCodec {
    type Error = MirrorError;

    fn encode(&mut self, item: StreamItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            StreamItem::Header(header) => dst.extend_from_slice(&header.encode()),
            StreamItem::Frame(record) => {
                let meta = record.meta()?;
                dst.reserve(record.wire_len());
                dst.extend_from_slice(&meta.encode());
                dst.extend_from_slice(&record.payload);
            }
        }
        Ok(())
    }
}

// ── Writers ──────────────────────────────────────────────────────

/// Best-effort single sync byte. Failures are ignored.
pub async fn write_sync_byte<W: AsyncWrite + Unpin>(writer: &mut W) -> bool {
    match writer.write_all(&[0]).await {
        Ok(()) => writer.flush().await.is_ok(),
        Err(e) => {
            tracing::debug!("sync byte not delivered: {e}");
            false
        }
    }
}

/// Write the stream header. Returns the number of bytes written.
pub async fn write_header<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &StreamHeader,
) -> Result<usize, MirrorError> {
    writer.write_all(&header.encode()).await?;
    writer.flush().await?;
    Ok(HEADER_SIZE)
}

/// Write one frame record: metadata, then the payload in bounded chunks.
///
/// Returns metadata overhead plus payload length.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    kind: FrameKind,
    payload: &[u8],
) -> Result<usize, MirrorError> {
    let payload_len = u32::try_from(payload.len()).map_err(|_| MirrorError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    let meta = FrameMeta { kind, payload_len };
    writer.write_all(&meta.encode()).await?;
    for chunk in payload.chunks(WRITE_CHUNK_SIZE) {
        writer.write_all(chunk).await?;
    }
    writer.flush().await?;
    Ok(FRAME_META_SIZE + payload.len())
}

// ── Tests ────────────────────────────────────────────────────────
