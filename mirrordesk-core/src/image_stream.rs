//! Image boundary recovery for the fallback image-loop capture mode.
//!
//! In this mode the transport carries raster images back to back
//! (a capture tool printing PNGs in a loop). Each image starts with
//! an 8-byte signature and is a sequence of chunks:
//!
//! ```text
//! length:   u32 (4, big-endian)
//! type:     [u8; 4]
//! data:     [u8] (length)
//! checksum: u32 (4)
//! ```
//!
//! ending with a terminal chunk type (`IEND`). [`ImageStreamDecoder`]
//! yields each image as one contiguous blob, signature to terminal
//! chunk inclusive. Before every image it resynchronizes by scanning
//! for the signature, so junk or a damaged boundary costs at most the
//! image it lands in.
//!
//! A short read at end of stream drops the partial image silently.

use std::io::Read;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::MirrorError;

/// PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// PNG terminal chunk type.
pub const PNG_TERMINAL_CHUNK: [u8; 4] = *b"IEND";

/// Default cap on a single image, signature included.
pub const DEFAULT_MAX_IMAGE_LEN: usize = 64 * 1024 * 1024;

/// Length + type + checksum around each chunk's data.
const CHUNK_OVERHEAD: usize = 12;
const CHUNK_PREFIX: usize = 8;

// ── ImageStreamDecoder ───────────────────────────────────────────

/// Splits a byte stream of self-delimited images.
///
/// Use with `tokio_util::codec::FramedRead` for a lazy async
/// sequence, or [`ImageFrames`] for a blocking reader.
#[derive(Debug)]
pub struct ImageStreamDecoder {
    signature: [u8; 8],
    terminal: [u8; 4],
    max_image_len: usize,
    /// Positioned on a signature at the start of the buffer.
    synced: bool,
    /// Offset just past the last complete chunk of the current image.
    cursor: usize,
    discarded: u64,
}

impl ImageStreamDecoder {
    /// Decoder for a stream of PNG images.
    pub fn png() -> Self {
        Self::with_signature(PNG_SIGNATURE, PNG_TERMINAL_CHUNK)
    }

    /// Decoder for any chunked format with an 8-byte signature.
    pub fn with_signature(signature: [u8; 8], terminal: [u8; 4]) -> Self {
        Self {
            signature,
            terminal,
            max_image_len: DEFAULT_MAX_IMAGE_LEN,
            synced: false,
            cursor: 0,
            discarded: 0,
        }
    }

    /// Override the per-image size cap.
    pub fn max_image_len(mut self, max: usize) -> Self {
        self.max_image_len = max.max(self.signature.len() + CHUNK_OVERHEAD);
        self
    }

    /// Bytes thrown away while resynchronizing.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    /// Scan for the signature, dropping everything before it.
    fn resync(&mut self, src: &mut BytesMut) -> bool {
        let sig_len = self.signature.len();
        match src
            .windows(sig_len)
            .position(|window| window == self.signature)
        {
            Some(pos) => {
                if pos > 0 {
                    debug!(skipped = pos, "resynchronized on image signature");
                    self.discard(src, pos);
                }
                self.synced = true;
                self.cursor = sig_len;
                true
            }
            None => {
                // Keep a partial signature that may complete on the next read.
                let keep = sig_len - 1;
                let drop = src.len().saturating_sub(keep);
                self.discard(src, drop);
                false
            }
        }
    }

    fn discard(&mut self, src: &mut BytesMut, n: usize) {
        src.advance(n);
        self.discarded += n as u64;
    }

    fn abandon_image(&mut self, src: &mut BytesMut) {
        // Step past this signature so the scan finds the next one.
        self.discard(src, 1);
        self.synced = false;
        self.cursor = 0;
    }
}

impl Default for ImageStreamDecoder {
    fn default() -> Self {
        Self::png()
    }
}

impl tokio_util::codec::Decoder for ImageStreamDecoder {
    type Item = Bytes;
    type Error = MirrorError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if !self.synced && !self.resync(src) {
                return Ok(None);
            }

            loop {
                if src.len() < self.cursor + CHUNK_PREFIX {
                    return Ok(None);
                }
                let at = self.cursor;
                let len = u32::from_be_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]]);
                let is_terminal = src[at + 4..at + 8] == self.terminal;
                let end = at + CHUNK_OVERHEAD + len as usize;

                if end > self.max_image_len {
                    warn!(
                        chunk_len = len,
                        max = self.max_image_len,
                        "implausible chunk length; dropping image"
                    );
                    self.abandon_image(src);
                    break;
                }
                if src.len() < end {
                    src.reserve(end - src.len());
                    return Ok(None);
                }

                self.cursor = end;
                if is_terminal {
                    let image = src.split_to(end).freeze();
                    self.synced = false;
                    self.cursor = 0;
                    return Ok(Some(image));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(image) = self.decode(src)? {
            return Ok(Some(image));
        }
        if !src.is_empty() {
            debug!(pending = src.len(), "stream ended inside an image");
            src.clear();
        }
        self.synced = false;
        self.cursor = 0;
        Ok(None)
    }
}

// ── ImageFrames ──────────────────────────────────────────────────

/// Blocking iterator over the images in a [`Read`] stream.
///
/// Finite only if the stream ends; once it returns `None` it stays
/// exhausted. Read errors end the sequence like end of stream.
pub struct ImageFrames<R> {
    reader: R,
    decoder: ImageStreamDecoder,
    buf: BytesMut,
    done: bool,
}

impl<R: Read> ImageFrames<R> {
    pub fn new(reader: R, decoder: ImageStreamDecoder) -> Self {
        Self {
            reader,
            decoder,
            buf: BytesMut::with_capacity(512 * 1024),
            done: false,
        }
    }
}

impl<R: Read> Iterator for ImageFrames<R> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        use tokio_util::codec::Decoder;

        let mut chunk = [0u8; 16 * 1024];
        while !self.done {
            match self.decoder.decode(&mut self.buf) {
                Ok(Some(image)) => return Some(image),
                Ok(None) => {}
                Err(e) => {
                    debug!("image stream decode error: {e}");
                    self.done = true;
                    break;
                }
            }
            match self.reader.read(&mut chunk) {
                Ok(0) => self.done = true,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!("image stream read error: {e}");
                    self.done = true;
                }
            }
        }
        None
    }
}

// ── Tests ────────────────────────────────────────────────────────
