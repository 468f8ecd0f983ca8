//! # mirrordesk-core
//!
//! Shared engine for MirrorDesk, a multi-device screen mirror.
//!
//! This crate contains:
//! - **Protocol**: `StreamHeader`, `FrameRecord`, `FrameKind` and the
//!   `MirrorCodec` for framed stream I/O via `tokio_util`
//! - **Image stream**: `ImageStreamDecoder`, recovering image boundaries
//!   from a raw capture loop, with signature resynchronization
//! - **Encoder**: the `VideoEncoder` seam and `EncoderSession`, which
//!   drains a hardware encoder onto the transport
//! - **Health**: `HealthController`, stall detection with key-frame
//!   recovery and bitrate backoff
//! - **Error**: `MirrorError`, a typed, `thiserror`-based error hierarchy

pub mod encoder;
pub mod error;
pub mod health;
pub mod image_stream;
pub mod protocol;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use encoder::{
    BufferFlags, DrainResult, EncoderFormat, EncoderSession, InputSurface, OutputBuffer,
    ParameterChange, VideoEncoder,
};
pub use error::MirrorError;
pub use health::{HealthAction, HealthController, HealthPolicy, HealthState};
pub use image_stream::{ImageFrames, ImageStreamDecoder, PNG_SIGNATURE};
pub use protocol::{
    CodecId, FrameKind, FrameMeta, FrameRecord, MirrorCodec, StreamHeader, StreamItem,
};
