//! Configuration for the host supervisor.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// How frames are captured on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Repeated full-screen PNG captures over `exec-out`.
    Image,
    /// H.264 frame records from the device server.
    Encoded,
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMode::Image => f.write_str("image"),
            CaptureMode::Encoded => f.write_str("encoded"),
        }
    }
}

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// adb location and device polling.
    pub adb: AdbConfig,
    /// Capture and parsing limits.
    pub stream: StreamConfig,
    /// Device server launch settings (encoded mode).
    pub server: DeviceServerConfig,
    /// Status reporting.
    pub status: StatusConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// adb settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdbConfig {
    /// Path to the adb binary. Empty means `$ADB`, `$ADB_PATH`, then `adb`.
    pub path: String,
    /// Timeout for `adb devices -l` in milliseconds.
    pub list_timeout_ms: u64,
    /// Interval between device polls in milliseconds.
    pub poll_interval_ms: u64,
}

/// Stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Capture mode: "image" or "encoded".
    pub mode: CaptureMode,
    /// Largest single image accepted in image mode, in bytes.
    pub max_image_len: usize,
    /// Largest frame payload accepted in encoded mode, in bytes.
    pub max_payload: usize,
}

/// Device server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceServerConfig {
    /// Host-side server binary to push before launch. Empty skips the push.
    pub push_from: String,
    /// Where the server binary lives on the device.
    pub device_path: String,
    /// Local socket name the server binds.
    pub socket_name: String,
    pub width: u32,
    pub height: u32,
    /// Encoder bitrate in bits/second.
    pub bit_rate: u32,
    pub max_fps: f32,
    /// First host TCP port used for forwards; one port per device.
    pub base_port: u16,
    /// Connection attempts while the server starts up.
    pub connect_attempts: u32,
    /// Delay between connection attempts in milliseconds.
    pub connect_retry_ms: u64,
}

/// Status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Print per-device status lines.
    pub enabled: bool,
    /// Interval between status reports in milliseconds.
    pub interval_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            adb: AdbConfig::default(),
            stream: StreamConfig::default(),
            server: DeviceServerConfig::default(),
            status: StatusConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            list_timeout_ms: 5000,
            poll_interval_ms: 2000,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Image,
            max_image_len: mirrordesk_core::image_stream::DEFAULT_MAX_IMAGE_LEN,
            max_payload: mirrordesk_core::protocol::DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl Default for DeviceServerConfig {
    fn default() -> Self {
        Self {
            push_from: String::new(),
            device_path: "/data/local/tmp/mirrordesk-server".into(),
            socket_name: "mirrordesk_demo".into(),
            width: 1280,
            height: 720,
            bit_rate: 6_000_000,
            max_fps: 60.0,
            base_port: 27183,
            connect_attempts: 20,
            connect_retry_ms: 250,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Arguments handed to the device server.
    pub fn server_args(&self) -> Vec<String> {
        let s = &self.server;
        vec![
            "--socket".into(),
            s.socket_name.clone(),
            "--w".into(),
            s.width.to_string(),
            "--h".into(),
            s.height.to_string(),
            "--bitrate".into(),
            s.bit_rate.to_string(),
            "--maxfps".into(),
            s.max_fps.to_string(),
        ]
    }
}

// ── Tests ────────────────────────────────────────────────────────
