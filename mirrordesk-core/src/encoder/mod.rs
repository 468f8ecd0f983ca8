//! Hardware video encoder abstraction.
//!
//! [`VideoEncoder`] is the seam to a platform encoder (a surface-fed
//! H.264 encoder on the device). [`EncoderSession`] owns one encoder
//! for its whole lifetime and turns its output buffers into frame
//! records on the transport.

pub mod session;

use std::time::Duration;

use async_trait::async_trait;
use bitflags::bitflags;
use bytes::Bytes;

use crate::error::MirrorError;
use crate::protocol::FrameKind;

pub use session::{DRAIN_TIMEOUT, DrainResult, EncoderSession};

/// MIME type of H.264 / AVC.
pub const MIME_AVC: &str = "video/avc";

// ── EncoderFormat ────────────────────────────────────────────────

/// Everything the encoder is configured with at session start.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderFormat {
    pub mime_type: String,
    pub bit_rate: u32,
    pub width: u32,
    pub height: u32,
    pub max_fps: f32,
    pub i_frame_interval_secs: u32,
    /// Re-emit the previous frame after this much input silence.
    pub repeat_previous_frame_us: u64,
}

// ── BufferFlags ──────────────────────────────────────────────────

bitflags! {
    /// Flags an encoder attaches to an output buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferFlags: u32 {
        const KEY_FRAME = 0x1;
        const CODEC_CONFIG = 0x2;
        const END_OF_STREAM = 0x4;
    }
}

// ── OutputBuffer ─────────────────────────────────────────────────

/// A dequeued compressed output buffer.
///
/// Must be handed back with [`VideoEncoder::release_output`].
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    pub index: usize,
    pub pts_us: i64,
    pub flags: BufferFlags,
    pub data: Bytes,
}

impl OutputBuffer {
    /// How this buffer is tagged on the wire.
    pub fn frame_kind(&self) -> FrameKind {
        FrameKind::from_flags(
            self.pts_us,
            self.flags.contains(BufferFlags::CODEC_CONFIG),
            self.flags.contains(BufferFlags::KEY_FRAME),
        )
    }
}

// ── InputSurface ─────────────────────────────────────────────────

/// Handle to the surface the capture source renders into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSurface {
    pub width: u32,
    pub height: u32,
    /// Backend-specific description of where frames come from.
    pub source: String,
}

// ── ParameterChange ──────────────────────────────────────────────

/// Runtime adjustments applied without reconfiguring the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterChange {
    /// Emit a sync frame on the next output.
    RequestSyncFrame,
    /// New target bitrate in bits/second.
    VideoBitrate(u32),
}

// ── VideoEncoder ─────────────────────────────────────────────────

/// A surface-driven hardware encoder.
///
/// Implementations are owned by exactly one [`EncoderSession`] and
/// are never shared.
#[async_trait]
pub trait VideoEncoder: Send {
    fn configure(&mut self, format: &EncoderFormat) -> Result<(), MirrorError>;

    fn create_input_surface(&mut self) -> Result<InputSurface, MirrorError>;

    fn start(&mut self) -> Result<(), MirrorError>;

    /// Wait up to `timeout` for a compressed buffer.
    async fn dequeue_output(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<OutputBuffer>, MirrorError>;

    fn release_output(&mut self, index: usize) -> Result<(), MirrorError>;

    fn set_parameters(&mut self, change: ParameterChange) -> Result<(), MirrorError>;

    fn stop(&mut self) -> Result<(), MirrorError>;
}

// ── Test double ──────────────────────────────────────────────────
