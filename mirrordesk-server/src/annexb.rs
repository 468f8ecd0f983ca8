//! H.264 Annex-B elementary stream splitting.
//!
//! [`AnnexBSplitter`] cuts a byte stream into NAL units at start codes
//! (`00 00 01` or `00 00 00 01`); each unit keeps its start code so it
//! can be forwarded to a decoder as-is. [`AccessUnitAssembler`] groups
//! NAL units into encoder-style output buffers:
//!
//! ```text
//! SPS / PPS before the first picture  → the one CODEC_CONFIG buffer
//! SPS / PPS after it                  → prefixed to the next picture
//! slices of one picture               → one buffer, KEY_FRAME if any is IDR
//! SEI / AUD / other                   → prefixed to the next picture
//! ```
//!
//! A picture ends at the next AUD, parameter set, SEI or slice with
//! `first_mb_in_slice == 0`, so each buffer is emitted one NAL late;
//! [`AccessUnitAssembler::flush`] releases the last one.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use mirrordesk_core::{BufferFlags, MirrorError};

const START_CODE: [u8; 3] = [0, 0, 1];

pub const NAL_SLICE: u8 = 1;
pub const NAL_IDR: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;

/// One NAL unit, start code included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    pub nal_type: u8,
    pub data: Bytes,
}

impl NalUnit {
    /// Coded slice of any kind.
    pub fn is_slice(&self) -> bool {
        (NAL_SLICE..=NAL_IDR).contains(&self.nal_type)
    }

    /// A slice with `first_mb_in_slice == 0`.
    ///
    /// That field is the first `ue(v)` after the header, and zero is
    /// coded as a single `1` bit.
    pub fn starts_picture(&self) -> bool {
        self.is_slice() && self.body().first().is_some_and(|b| b & 0x80 != 0)
    }

    fn body(&self) -> &[u8] {
        find_start_code(&self.data, 0)
            .and_then(|(_, payload)| self.data.get(payload + 1..))
            .unwrap_or_default()
    }
}

/// Locate the next start code at or after `from`.
///
/// Returns `(start_of_code, first_payload_byte)`. A zero byte directly
/// before `00 00 01` is taken as part of a four-byte code.
fn find_start_code(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    if buf.len() < from + START_CODE.len() {
        return None;
    }
    let pos = buf[from..]
        .windows(START_CODE.len())
        .position(|w| w == START_CODE)?
        + from;
    let start = if pos > from && buf[pos - 1] == 0 {
        pos - 1
    } else {
        pos
    };
    Some((start, pos + START_CODE.len()))
}

// ── AnnexBSplitter ───────────────────────────────────────────────

/// `tokio_util` decoder yielding NAL units.
///
/// Bytes before the first start code are discarded. A unit is only
/// emitted once the following start code is seen, or at end of stream.
#[derive(Debug, Default)]
pub struct AnnexBSplitter {
    /// Offset up to which the current unit has been searched.
    scanned: usize,
}

impl AnnexBSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn unit(data: Bytes) -> Option<NalUnit> {
        let (_, payload) = find_start_code(&data, 0)?;
        let header = *data.get(payload)?;
        Some(NalUnit {
            nal_type: header & 0x1F,
            data,
        })
    }
}

impl Decoder for AnnexBSplitter {
    type Item = NalUnit;
    type Error = MirrorError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some((start, payload)) = find_start_code(src, 0) else {
                // Keep a possible partial start code.
                let keep = src.len().min(START_CODE.len());
                src.advance(src.len() - keep);
                self.scanned = 0;
                return Ok(None);
            };
            if start > 0 {
                src.advance(start);
                self.scanned = 0;
                continue;
            }

            let from = self.scanned.max(payload);
            match find_start_code(src, from) {
                Some((next, _)) => {
                    self.scanned = 0;
                    let data = src.split_to(next).freeze();
                    match Self::unit(data) {
                        Some(unit) => return Ok(Some(unit)),
                        None => continue,
                    }
                }
                None => {
                    self.scanned = src.len().saturating_sub(START_CODE.len()).max(payload);
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(unit) = self.decode(src)? {
            return Ok(Some(unit));
        }
        self.scanned = 0;
        if find_start_code(src, 0).is_some_and(|(start, _)| start == 0) {
            let data = src.split().freeze();
            return Ok(Self::unit(data));
        }
        src.clear();
        Ok(None)
    }
}

// ── AccessUnitAssembler ──────────────────────────────────────────

/// An encoder-style output buffer built from NAL units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub flags: BufferFlags,
    pub data: Bytes,
}

/// Groups NAL units into config / key / delta buffers.
#[derive(Debug, Default)]
pub struct AccessUnitAssembler {
    config: BytesMut,
    /// Set once the first picture starts; no config buffer after that.
    config_closed: bool,
    prefix: BytesMut,
    picture: BytesMut,
    key_frame: bool,
}

impl AccessUnitAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue a stream whose config buffer was already emitted.
    ///
    /// Parameter sets are prefixed to the next picture instead.
    pub fn resumed() -> Self {
        Self {
            config_closed: true,
            ..Self::default()
        }
    }

    /// Feed one NAL unit; returns the buffers it completes, in order.
    pub fn push(&mut self, nal: NalUnit) -> Vec<AccessUnit> {
        let mut out = Vec::with_capacity(2);

        if !nal.is_slice() {
            out.extend(self.flush());
            match nal.nal_type {
                NAL_SPS | NAL_PPS if !self.config_closed => {
                    self.config.extend_from_slice(&nal.data)
                }
                _ => self.prefix.extend_from_slice(&nal.data),
            }
            return out;
        }

        if nal.starts_picture() {
            out.extend(self.flush());
        }

        if self.picture.is_empty() {
            if !self.config_closed {
                self.config_closed = true;
                if !self.config.is_empty() {
                    out.push(AccessUnit {
                        flags: BufferFlags::CODEC_CONFIG,
                        data: self.config.split().freeze(),
                    });
                }
            }
            self.picture = self.prefix.split();
        }
        self.picture.extend_from_slice(&nal.data);
        self.key_frame |= nal.nal_type == NAL_IDR;
        out
    }

    /// Emit the picture in progress, if any.
    pub fn flush(&mut self) -> Option<AccessUnit> {
        if self.picture.is_empty() {
            return None;
        }
        let flags = if std::mem::take(&mut self.key_frame) {
            BufferFlags::KEY_FRAME
        } else {
            BufferFlags::empty()
        };
        Some(AccessUnit {
            flags,
            data: self.picture.split().freeze(),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
