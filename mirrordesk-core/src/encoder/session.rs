//! One encoder, from configure+start to stop.

use std::time::Duration;

use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use crate::encoder::{EncoderFormat, InputSurface, ParameterChange, VideoEncoder};
use crate::error::MirrorError;
use crate::protocol::{FrameKind, write_frame};

/// Upper bound on a single wait for encoder output.
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

// ── DrainResult ──────────────────────────────────────────────────

/// Outcome of one [`EncoderSession::drain_once`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainResult {
    /// A frame record was written; `bytes` counts metadata and payload.
    ProducedBytes { bytes: usize, kind: FrameKind },
    /// The encoder handed back an empty buffer; it was released.
    EmptyBuffer,
    /// Nothing was ready within the wait window.
    NoOutputAvailable,
}

// ── EncoderSession ───────────────────────────────────────────────

/// Exclusive owner of one running encoder and its input surface.
pub struct EncoderSession<E: VideoEncoder> {
    encoder: E,
    surface: InputSurface,
    format: EncoderFormat,
    bit_rate: u32,
    drain_timeout: Duration,
    stopped: bool,
}

impl<E: VideoEncoder> EncoderSession<E> {
    /// Configure the encoder for surface input, allocate the surface
    /// and start encoding.
    ///
    /// If any step fails the encoder is stopped before returning.
    pub fn create(mut encoder: E, format: EncoderFormat) -> Result<Self, MirrorError> {
        let surface = match Self::start_encoder(&mut encoder, &format) {
            Ok(surface) => surface,
            Err(e) => {
                if let Err(stop_err) = encoder.stop() {
                    warn!("encoder stop after failed setup: {stop_err}");
                }
                return Err(e);
            }
        };

        info!(
            mime = %format.mime_type,
            width = format.width,
            height = format.height,
            bit_rate = format.bit_rate,
            max_fps = format.max_fps,
            "encoder session started"
        );

        Ok(Self {
            bit_rate: format.bit_rate,
            encoder,
            surface,
            format,
            drain_timeout: DRAIN_TIMEOUT,
            stopped: false,
        })
    }

    fn start_encoder(encoder: &mut E, format: &EncoderFormat) -> Result<InputSurface, MirrorError> {
        encoder.configure(format)?;
        let surface = encoder.create_input_surface()?;
        encoder.start()?;
        Ok(surface)
    }

    /// Override the per-call output wait.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Pull at most one output buffer and write it as a frame record.
    ///
    /// Every dequeued buffer is released, including when the write fails.
    pub async fn drain_once<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut W,
    ) -> Result<DrainResult, MirrorError> {
        let Some(buffer) = self.encoder.dequeue_output(self.drain_timeout).await? else {
            return Ok(DrainResult::NoOutputAvailable);
        };

        let kind = buffer.frame_kind();
        let written = if buffer.data.is_empty() {
            Ok(None)
        } else {
            write_frame(writer, kind, &buffer.data).await.map(Some)
        };
        let released = self.encoder.release_output(buffer.index);

        match written? {
            Some(bytes) => {
                released?;
                debug!(bytes, ?kind, "frame written");
                Ok(DrainResult::ProducedBytes { bytes, kind })
            }
            None => {
                released?;
                Ok(DrainResult::EmptyBuffer)
            }
        }
    }

    /// Ask for a sync frame without waiting for the interval timer.
    pub fn request_key_frame(&mut self) -> Result<(), MirrorError> {
        self.encoder.set_parameters(ParameterChange::RequestSyncFrame)
    }

    /// Change the live target bitrate.
    pub fn update_bitrate(&mut self, bit_rate: u32) -> Result<(), MirrorError> {
        self.encoder
            .set_parameters(ParameterChange::VideoBitrate(bit_rate))?;
        self.bit_rate = bit_rate;
        Ok(())
    }

    /// Current target bitrate.
    pub fn bit_rate(&self) -> u32 {
        self.bit_rate
    }

    pub fn format(&self) -> &EncoderFormat {
        &self.format
    }

    pub fn input_surface(&self) -> &InputSurface {
        &self.surface
    }

    /// Stop the encoder. Later calls are no-ops.
    pub fn stop(&mut self) -> Result<(), MirrorError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        info!("encoder session stopped");
        self.encoder.stop()
    }
}

impl<E: VideoEncoder> Drop for EncoderSession<E> {
    fn drop(&mut self) {
        if !self.stopped {
            if let Err(e) = self.stop() {
                warn!("encoder stop failed: {e}");
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
