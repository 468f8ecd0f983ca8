//! The stream header written once per session, before any frame record.
//!
//! ## Wire format (12 bytes, big-endian)
//! ```text
//! codec_id: u32  (4)  four-character tag, e.g. "h264"
//! width:    u32  (4)
//! height:   u32  (4)
//! ```

use std::fmt;

use crate::error::MirrorError;

/// Encoded size of a [`StreamHeader`] on the wire.
pub const HEADER_SIZE: usize = 12;

// ── CodecId ──────────────────────────────────────────────────────

/// Four-character codec tag carried in the stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodecId(pub u32);

impl CodecId {
    /// H.264 / AVC (`"h264"`).
    pub const H264: CodecId = CodecId(u32::from_be_bytes(*b"h264"));

    /// The tag as it appears on the wire.
    pub const fn tag(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        if tag.iter().all(|b| b.is_ascii_graphic()) {
            // All four bytes are printable ASCII.
            write!(f, "{}", String::from_utf8_lossy(&tag))
        } else {
            write!(f, "{:#010x}", self.0)
        }
    }
}

// ── StreamHeader ─────────────────────────────────────────────────

/// Immutable description of the video stream that follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub codec_id: CodecId,
    pub width: u32,
    pub height: u32,
}

impl StreamHeader {
    pub fn new(codec_id: CodecId, width: u32, height: u32) -> Self {
        Self {
            codec_id,
            width,
            height,
        }
    }

    /// Serialize to the fixed 12-byte layout.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.codec_id.0.to_be_bytes());
        buf[4..8].copy_from_slice(&self.width.to_be_bytes());
        buf[8..12].copy_from_slice(&self.height.to_be_bytes());
        buf
    }

    /// Deserialize from the first 12 bytes of `data`.
    ///
    /// Extra trailing bytes are ignored; they belong to the caller.
    pub fn decode(data: &[u8]) -> Result<Self, MirrorError> {
        let Some(bytes) = data.get(..HEADER_SIZE) else {
            return Err(MirrorError::MalformedHeader(data.len()));
        };
        Ok(Self {
            codec_id: CodecId(be_u32(&bytes[0..4])),
            width: be_u32(&bytes[4..8]),
            height: be_u32(&bytes[8..12]),
        })
    }
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h264_tag_matches_ascii() {
        assert_eq!(CodecId::H264.0, 0x6832_3634);
        assert_eq!(&CodecId::H264.tag(), b"h264");
        assert_eq!(CodecId::H264.to_string(), "h264");
        assert_eq!(CodecId(1).to_string(), "0x00000001");
    }

    #[test]
    fn header_layout_is_big_endian() {
        let hdr = StreamHeader::new(CodecId::H264, 1280, 720);
        let bytes = hdr.encode();
        assert_eq!(&bytes[0..4], b"h264");
        assert_eq!(&bytes[4..8], &[0, 0, 0x05, 0x00]);
        assert_eq!(&bytes[8..12], &[0, 0, 0x02, 0xD0]);
    }

    #[test]
    fn header_decodes_what_it_encodes() {
        for (codec, w, h) in [
            (CodecId::H264, 1280, 720),
            (CodecId(0), 0, 0),
            (CodecId(u32::MAX), u32::MAX, 1),
        ] {
            let decoded = StreamHeader::decode(&StreamHeader::new(codec, w, h).encode()).unwrap();
            assert_eq!((decoded.codec_id, decoded.width, decoded.height), (codec, w, h));
        }
    }

    #[test]
    fn short_header_is_malformed() {
        let err = StreamHeader::decode(&[0u8; 11]).unwrap_err();
        assert!(matches!(err, MirrorError::MalformedHeader(11)));
    }
}
