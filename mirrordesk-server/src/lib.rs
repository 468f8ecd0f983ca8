//! # mirrordesk-server — device-side capture server
//!
//! Runs on the device. Binds a named local socket, waits for the host
//! to connect through a port tunnel, then streams the screen as H.264
//! frame records until the connection drops.
//!
//! ```text
//! MediaCodec (Android) ─────────────────────────────▶ MediaCodecEncoder ─┐
//! recorder stdout ─▶ AnnexBSplitter ─▶ AccessUnitAssembler ─▶ ProcessEncoder ┤
//!                                                                            │
//!                               socket ◀─ EncoderSession ◀─ HealthController ◀┘
//! ```
//!
//! The recorder is the fallback where MediaCodec is unavailable; it
//! applies runtime changes by relaunching.

pub mod annexb;
pub mod config;
pub mod encoder;
#[cfg(target_os = "android")]
pub mod mediacodec;
pub mod server;
pub mod socket;

pub use config::{EncoderBackend, ServerConfig};
pub use encoder::ProcessEncoder;
#[cfg(target_os = "android")]
pub use mediacodec::MediaCodecEncoder;
pub use server::MirrorServer;
