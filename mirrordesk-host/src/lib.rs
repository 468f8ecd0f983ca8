//! # mirrordesk-host — multi-device capture supervisor
//!
//! Watches the attached devices and keeps exactly one capture stream
//! running per device that is ready to mirror.
//!
//! ## Pieces
//!
//! - **Device**: enumeration through `adb devices -l`
//! - **Tunnel / Launcher**: port forwards and capture subprocesses
//! - **Session**: one device's reader task and its observable state
//! - **Reconciler**: the device → session table
//! - **Supervisor**: polling loop and status output
//!
//! ## Capture modes
//!
//! - **Image**: a PNG screenshot loop, split with the core image parser
//! - **Encoded**: H.264 frame records from `mirrordesk-server`, decoded
//!   to RGBA with libavcodec

pub mod adb;
pub mod config;
pub mod decode;
pub mod device;
pub mod h264;
pub mod launcher;
pub mod reconciler;
pub mod session;
pub mod supervisor;
pub mod tunnel;

pub use config::{CaptureMode, HostConfig};
pub use decode::{DecodedImage, Frame, VideoFrame};
pub use device::{DeviceInfo, DeviceProvider, DeviceState};
pub use h264::{H264Decoder, Picture};
pub use launcher::{CaptureLauncher, CaptureProcess};
pub use reconciler::{DeviceSetReconciler, ReconcileOutcome};
pub use session::{DeviceStreamSession, DeviceStreamState};
pub use supervisor::Supervisor;
pub use tunnel::TunnelProvider;
