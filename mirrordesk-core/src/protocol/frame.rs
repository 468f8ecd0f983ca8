//! Frame records: 12 bytes of metadata followed by the payload.
//!
//! ## Wire format (big-endian)
//! ```text
//! pts_and_flags:  i64  (8)
//! payload_len:    u32  (4)
//! payload:        [u8] (payload_len)
//! ```
//!
//! `pts_and_flags` packs the presentation timestamp (µs) in the low
//! 62 bits. Bit 63 marks codec configuration data, in which case the
//! remaining bits carry nothing. Bit 62 marks a key frame and is only
//! meaningful when bit 63 is clear.
//!
//! The packed form exists only at this boundary: everywhere else a
//! frame is described by [`FrameKind`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MirrorError;

/// Encoded size of [`FrameMeta`] on the wire.
pub const FRAME_META_SIZE: usize = 12;

const CONFIG_FLAG: u64 = 1 << 63;
const KEY_FRAME_FLAG: u64 = 1 << 62;
const PTS_MASK: u64 = KEY_FRAME_FLAG - 1;

// ── FrameKind ────────────────────────────────────────────────────

/// What a frame record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Decoder configuration (e.g. SPS/PPS). Not displayable.
    Config,
    /// Self-contained frame at the given presentation time (µs).
    KeyFrame(i64),
    /// Frame that references earlier frames.
    DeltaFrame(i64),
}

impl FrameKind {
    /// Build from the flag pair an encoder reports.
    ///
    /// The key-frame flag is ignored on config buffers.
    pub fn from_flags(pts_us: i64, is_config: bool, is_key_frame: bool) -> Self {
        match (is_config, is_key_frame) {
            (true, _) => FrameKind::Config,
            (false, true) => FrameKind::KeyFrame(pts_us),
            (false, false) => FrameKind::DeltaFrame(pts_us),
        }
    }

    /// Presentation timestamp, absent for config data.
    pub fn pts_us(self) -> Option<i64> {
        match self {
            FrameKind::Config => None,
            FrameKind::KeyFrame(pts) | FrameKind::DeltaFrame(pts) => Some(pts),
        }
    }

    pub fn is_config(self) -> bool {
        matches!(self, FrameKind::Config)
    }

    pub fn is_key_frame(self) -> bool {
        matches!(self, FrameKind::KeyFrame(_))
    }

    /// Pack into the signed 64-bit wire field.
    ///
    /// Timestamps are truncated to their low 62 bits.
    pub fn to_wire(self) -> i64 {
        let packed = match self {
            FrameKind::Config => CONFIG_FLAG,
            FrameKind::KeyFrame(pts) => (pts as u64 & PTS_MASK) | KEY_FRAME_FLAG,
            FrameKind::DeltaFrame(pts) => pts as u64 & PTS_MASK,
        };
        packed as i64
    }

    /// Unpack the signed 64-bit wire field.
    pub fn from_wire(value: i64) -> Self {
        let raw = value as u64;
        if raw & CONFIG_FLAG != 0 {
            return FrameKind::Config;
        }
        let pts = (raw & PTS_MASK) as i64;
        if raw & KEY_FRAME_FLAG != 0 {
            FrameKind::KeyFrame(pts)
        } else {
            FrameKind::DeltaFrame(pts)
        }
    }
}

// ── FrameMeta ────────────────────────────────────────────────────

/// The fixed-size prefix of a frame record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    pub kind: FrameKind,
    pub payload_len: u32,
}

impl FrameMeta {
    /// Serialize to bytes.
    pub fn encode(&self) -> [u8; FRAME_META_SIZE] {
        let mut buf = [0u8; FRAME_META_SIZE];
        buf[0..8].copy_from_slice(&self.kind.to_wire().to_be_bytes());
        buf[8..12].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    /// Deserialize from the first 12 bytes of `data`.
    ///
    /// The caller is responsible for reading exactly `payload_len`
    /// further bytes as payload.
    pub fn decode(data: &[u8]) -> Result<Self, MirrorError> {
        let Some(bytes) = data.get(..FRAME_META_SIZE) else {
            return Err(MirrorError::MalformedFrameMeta(data.len()));
        };
        let mut pts = [0u8; 8];
        pts.copy_from_slice(&bytes[0..8]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[8..12]);
        Ok(Self {
            kind: FrameKind::from_wire(i64::from_be_bytes(pts)),
            payload_len: u32::from_be_bytes(len),
        })
    }
}

// ── FrameRecord ──────────────────────────────────────────────────

/// A complete frame record: metadata plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl FrameRecord {
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Metadata describing this record.
    ///
    /// Fails if the payload does not fit the 32-bit length field.
    pub fn meta(&self) -> Result<FrameMeta, MirrorError> {
        let payload_len = u32::try_from(self.payload.len()).map_err(|_| {
            MirrorError::PayloadTooLarge {
                size: self.payload.len(),
                max: u32::MAX as usize,
            }
        })?;
        Ok(FrameMeta {
            kind: self.kind,
            payload_len,
        })
    }

    /// Bytes this record occupies on the wire.
    pub fn wire_len(&self) -> usize {
        FRAME_META_SIZE + self.payload.len()
    }

    /// Serialize metadata and payload into one buffer.
    pub fn encode(&self) -> Result<Bytes, MirrorError> {
        let meta = self.meta()?;
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_slice(&meta.encode());
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }
}

// ── Tests ────────────────────────────────────────────────────────
