//! One device's capture stream, from launch to teardown.
//!
//! The reader task is the only writer of the session's observable
//! state while it runs; `start` and `stop` touch it only when no task
//! is live. Readers take snapshots through a `watch` channel.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mirrordesk_core::{MirrorError, StreamHeader};

use crate::config::{CaptureMode, StreamConfig};
use crate::decode::{Decoded, FrameDecoder, PngFrameDecoder, SharedFrame, VideoFrameDecoder};
use crate::launcher::{CaptureLauncher, CaptureReader};

// ── DeviceStreamState ────────────────────────────────────────────

/// Snapshot of a session, replaced wholesale on every update.
#[derive(Debug, Clone, Default)]
pub struct DeviceStreamState {
    /// A reader task is live.
    pub running: bool,
    /// Payload bytes of displayable units received so far.
    pub bytes_received: u64,
    pub frames_received: u64,
    /// Last session-ending fault, as text.
    pub error: Option<String>,
    pub last_frame: Option<SharedFrame>,
    /// Stream header, in encoded mode.
    pub header: Option<StreamHeader>,
}

// ── DeviceStreamSession ──────────────────────────────────────────

struct Worker {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns one device's capture process and reader task.
pub struct DeviceStreamSession {
    device_id: String,
    launcher: Arc<dyn CaptureLauncher>,
    limits: StreamConfig,
    state: Arc<watch::Sender<DeviceStreamState>>,
    worker: Option<Worker>,
}

impl DeviceStreamSession {
    pub fn new(
        device_id: impl Into<String>,
        launcher: Arc<dyn CaptureLauncher>,
        limits: StreamConfig,
    ) -> Self {
        let (state, _) = watch::channel(DeviceStreamState::default());
        Self {
            device_id: device_id.into(),
            launcher,
            limits,
            state: Arc::new(state),
            worker: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Subscribe to state updates.
    pub fn subscribe(&self) -> watch::Receiver<DeviceStreamState> {
        self.state.subscribe()
    }

    /// Current state snapshot.
    pub fn state(&self) -> DeviceStreamState {
        self.state.borrow().clone()
    }

    /// Whether `start` has been called without a matching `stop`.
    ///
    /// Stays true after the reader task ends on its own.
    pub fn is_started(&self) -> bool {
        self.worker.is_some()
    }

    /// Launch the capture and its reader task. No-op if already started.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }

        self.state.send_modify(|s| {
            s.running = true;
            s.error = None;
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_capture(
            self.device_id.clone(),
            Arc::clone(&self.launcher),
            self.limits.clone(),
            Arc::clone(&self.state),
            cancel.clone(),
        ));
        info!(device = %self.device_id, mode = %self.launcher.mode(), "session started");
        self.worker = Some(Worker { cancel, task });
    }

    /// Terminate the capture process and wait for the reader task.
    ///
    /// Returns only once the process is dead and the task has finished.
    /// Safe to call repeatedly.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.cancel.cancel();
        if let Err(e) = worker.task.await {
            if e.is_panic() {
                error!(device = %self.device_id, "reader task panicked");
            }
        }
        self.state.send_modify(|s| s.running = false);
        info!(device = %self.device_id, "session stopped");
    }
}

impl Drop for DeviceStreamSession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
        }
    }
}

// ── Reader task ──────────────────────────────────────────────────

async fn run_capture(
    device_id: String,
    launcher: Arc<dyn CaptureLauncher>,
    limits: StreamConfig,
    state: Arc<watch::Sender<DeviceStreamState>>,
    cancel: CancellationToken,
) {
    let launched = tokio::select! {
        _ = cancel.cancelled() => None,
        r = launcher.launch(&device_id) => Some(r),
    };

    let result = match launched {
        None => Ok(()),
        Some(Err(e)) => Err(e),
        Some(Ok(process)) => {
            let (reader, guard) = process.into_parts();
            let pumped = tokio::select! {
                _ = cancel.cancelled() => Ok(()),
                r = pump_mode(launcher.mode(), &limits, reader, &state, &device_id) => r,
            };
            guard.terminate().await;
            pumped
        }
    };

    match &result {
        Ok(()) => debug!(device = %device_id, "reader finished"),
        Err(e) => error!(device = %device_id, "session failed: {e}"),
    }
    state.send_modify(|s| {
        s.running = false;
        if let Err(e) = result {
            s.error = Some(e.to_string());
        }
    });
}

async fn pump_mode(
    mode: CaptureMode,
    limits: &StreamConfig,
    reader: CaptureReader,
    state: &watch::Sender<DeviceStreamState>,
    device_id: &str,
) -> Result<(), MirrorError> {
    match mode {
        CaptureMode::Image => {
            pump(PngFrameDecoder::new(limits.max_image_len), reader, state, device_id).await
        }
        CaptureMode::Encoded => {
            pump(VideoFrameDecoder::new(limits.max_payload), reader, state, device_id).await
        }
    }
}

/// Read units until the stream ends, publishing each decoded frame.
async fn pump<D: FrameDecoder>(
    mut decoder: D,
    reader: CaptureReader,
    state: &watch::Sender<DeviceStreamState>,
    device_id: &str,
) -> Result<(), MirrorError> {
    let mut units = FramedRead::new(reader, decoder.codec());

    while let Some(unit) = units.next().await {
        let unit = match unit {
            Ok(unit) => unit,
            Err(e) if e.is_stream_end() => {
                debug!(device = device_id, "stream ended: {e}");
                break;
            }
            Err(e) => return Err(e),
        };

        match decoder.decode(unit) {
            Ok(Decoded::Frame { frame, bytes }) => state.send_modify(|s| {
                s.bytes_received += bytes as u64;
                s.frames_received += 1;
                s.last_frame = Some(Arc::new(frame));
            }),
            Ok(Decoded::Header(header)) => {
                info!(
                    device = device_id,
                    codec = %header.codec_id,
                    width = header.width,
                    height = header.height,
                    "stream header"
                );
                state.send_modify(|s| s.header = Some(header));
            }
            Ok(Decoded::Buffered { bytes }) => state.send_modify(|s| {
                s.bytes_received += bytes as u64;
            }),
            Ok(Decoded::Nothing) => {}
            Err(MirrorError::ImageDecode(msg)) => {
                warn!(device = device_id, "dropping undecodable image: {msg}");
            }
            Err(MirrorError::VideoDecode(msg)) => {
                warn!(device = device_id, "dropping undecodable video frame: {msg}");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
