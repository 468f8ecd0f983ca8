//! Configuration for the device-side capture server.
//!
//! Built once from the command line and passed down; nothing reads
//! global defaults after startup. Parsing is lenient: unknown flags
//! are skipped and a malformed value leaves the default in place.

use mirrordesk_core::encoder::MIME_AVC;
use mirrordesk_core::{CodecId, EncoderFormat, HealthPolicy, StreamHeader};

pub const DEFAULT_SOCKET_NAME: &str = "mirrordesk_demo";
pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;
pub const DEFAULT_BIT_RATE: u32 = 6_000_000;
pub const DEFAULT_MAX_FPS: f32 = 60.0;
pub const DEFAULT_ENCODER_PROGRAM: &str = "screenrecord";

/// Recorder command line. `{width}`, `{height}`, `{bit_rate}`,
/// `{max_fps}`, `{i_frame_interval}`, `{repeat_us}` and `{time_limit}`
/// are filled in per launch. `screenrecord` has no frame-rate option.
pub const DEFAULT_RECORDER_ARGS: &[&str] = &[
    "--output-format=h264",
    "--size",
    "{width}x{height}",
    "--bit-rate",
    "{bit_rate}",
    "--time-limit",
    "{time_limit}",
    "-",
];

/// Seconds between periodic I-frames.
pub const I_FRAME_INTERVAL_SECS: u32 = 10;
/// Re-send the last frame after this much capture silence.
pub const REPEAT_PREVIOUS_FRAME_US: u64 = 100_000;

/// Which [`VideoEncoder`](mirrordesk_core::VideoEncoder) drives the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderBackend {
    /// The platform MediaCodec encoder. Android only.
    MediaCodec,
    /// An external recording tool writing Annex-B to stdout.
    Recorder,
}

impl EncoderBackend {
    /// MediaCodec where the platform has it, the recorder elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "android") {
            EncoderBackend::MediaCodec
        } else {
            EncoderBackend::Recorder
        }
    }

    fn parse(v: &str) -> Option<Self> {
        match v {
            "mediacodec" => Some(EncoderBackend::MediaCodec),
            "recorder" => Some(EncoderBackend::Recorder),
            _ => None,
        }
    }
}

/// Immutable server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Name of the local socket the host connects through.
    pub socket_name: String,
    pub width: u32,
    pub height: u32,
    /// Initial encoder bitrate in bits/second.
    pub bit_rate: u32,
    /// Frame-rate cap handed to the encoder.
    pub max_fps: f32,
    /// Stall and backoff thresholds.
    pub health: HealthPolicy,
    pub encoder: EncoderBackend,
    /// Program producing the H.264 elementary stream.
    pub encoder_program: String,
    /// Argument template for `encoder_program`.
    pub recorder_args: Vec<String>,
    /// Log level when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_name: DEFAULT_SOCKET_NAME.into(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            bit_rate: DEFAULT_BIT_RATE,
            max_fps: DEFAULT_MAX_FPS,
            health: HealthPolicy::default(),
            encoder: EncoderBackend::platform_default(),
            encoder_program: DEFAULT_ENCODER_PROGRAM.into(),
            recorder_args: DEFAULT_RECORDER_ARGS.iter().map(|a| a.to_string()).collect(),
            log_level: "info".into(),
        }
    }
}

impl ServerConfig {
    /// Parse command-line arguments (without the program name).
    ///
    /// A flag only consumes the following token when that token is a
    /// valid value; otherwise the token is examined as a flag itself.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let mut cfg = Self::default();
        let mut i = 0;

        while i < args.len() {
            let value = args.get(i + 1).map(|s| s.as_ref());
            let consumed = match args[i].as_ref() {
                "--socket" => set(&mut cfg.socket_name, value.map(str::to_string)),
                "--w" => set(&mut cfg.width, value.and_then(|v| v.parse().ok())),
                "--h" => set(&mut cfg.height, value.and_then(|v| v.parse().ok())),
                "--bitrate" => set(&mut cfg.bit_rate, value.and_then(|v| v.parse().ok())),
                "--maxfps" => set(&mut cfg.max_fps, value.and_then(parse_fps)),
                "--stall-polls" => set(
                    &mut cfg.health.stall_polls,
                    value.and_then(|v| v.parse().ok()).filter(|n| *n > 0),
                ),
                "--bitrate-decay" => set(
                    &mut cfg.health.decay_percent,
                    value.and_then(parse_percent),
                ),
                "--bitrate-floor" => set(
                    &mut cfg.health.floor_percent,
                    value.and_then(parse_percent),
                ),
                "--min-bitrate" => set(
                    &mut cfg.health.min_bitrate,
                    value.and_then(|v| v.parse().ok()),
                ),
                "--encoder" => set(&mut cfg.encoder, value.and_then(EncoderBackend::parse)),
                "--encoder-cmd" => set(&mut cfg.encoder_program, value.map(str::to_string)),
                "--encoder-args" => set(
                    &mut cfg.recorder_args,
                    value
                        .map(|v| v.split_whitespace().map(str::to_string).collect::<Vec<_>>())
                        .filter(|a| !a.is_empty()),
                ),
                "--log" => set(&mut cfg.log_level, value.map(str::to_string)),
                _ => false,
            };
            i += if consumed { 2 } else { 1 };
        }

        cfg
    }

    /// Encoder settings for the capture session.
    pub fn encoder_format(&self) -> EncoderFormat {
        EncoderFormat {
            mime_type: MIME_AVC.into(),
            bit_rate: self.bit_rate,
            width: self.width,
            height: self.height,
            max_fps: self.max_fps,
            i_frame_interval_secs: I_FRAME_INTERVAL_SECS,
            repeat_previous_frame_us: REPEAT_PREVIOUS_FRAME_US,
        }
    }

    /// Header announced to the host before any frame.
    pub fn stream_header(&self) -> StreamHeader {
        StreamHeader::new(CodecId::H264, self.width, self.height)
    }
}

fn set<T>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(v) => {
            *slot = v;
            true
        }
        None => false,
    }
}

fn parse_fps(v: &str) -> Option<f32> {
    v.parse::<f32>().ok().filter(|f| f.is_finite() && *f > 0.0)
}

fn parse_percent(v: &str) -> Option<u32> {
    v.parse::<u32>().ok().filter(|p| *p <= 100)
}

// ── Tests ────────────────────────────────────────────────────────
