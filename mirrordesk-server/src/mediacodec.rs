//! [`VideoEncoder`] on the platform MediaCodec H.264 encoder.
//!
//! The codec and its input window stay on one worker thread; each
//! trait call is shipped there as a job and its result sent back.
//! Runtime changes go through `AMediaCodec_setParameters`
//! (`request-sync` and `video-bitrate`), so the codec never restarts.

use std::collections::HashSet;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ndk::media::media_codec::{DequeuedOutputBufferInfoResult, MediaCodec, MediaCodecDirection};
use ndk::media::media_format::MediaFormat;
use ndk::media_error::MediaError;
use ndk::native_window::NativeWindow;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use mirrordesk_core::{
    BufferFlags, EncoderFormat, InputSurface, MirrorError, OutputBuffer, ParameterChange,
    VideoEncoder,
};

const KEY_MIME: &str = "mime";
const KEY_WIDTH: &str = "width";
const KEY_HEIGHT: &str = "height";
const KEY_BIT_RATE: &str = "bitrate";
const KEY_FRAME_RATE: &str = "frame-rate";
const KEY_COLOR_FORMAT: &str = "color-format";
const KEY_I_FRAME_INTERVAL: &str = "i-frame-interval";
const KEY_REPEAT_PREVIOUS_FRAME_AFTER: &str = "repeat-previous-frame-after";
const KEY_MAX_FPS_TO_ENCODER: &str = "max-fps-to-encoder";
const PARAMETER_REQUEST_SYNC_FRAME: &str = "request-sync";
const PARAMETER_VIDEO_BITRATE: &str = "video-bitrate";

/// `COLOR_FormatSurface`: input arrives through the codec's window.
const COLOR_FORMAT_SURFACE: i32 = 0x7F00_0789;

const FLAG_KEY_FRAME: u32 = 1;
const FLAG_CODEC_CONFIG: u32 = 2;
const FLAG_END_OF_STREAM: u32 = 4;

fn media_err(what: &'static str) -> impl Fn(MediaError) -> MirrorError {
    move |e| MirrorError::Encoder(format!("{what}: {e}"))
}

fn buffer_flags(raw: u32) -> BufferFlags {
    let mut flags = BufferFlags::empty();
    flags.set(BufferFlags::KEY_FRAME, raw & FLAG_KEY_FRAME != 0);
    flags.set(BufferFlags::CODEC_CONFIG, raw & FLAG_CODEC_CONFIG != 0);
    flags.set(BufferFlags::END_OF_STREAM, raw & FLAG_END_OF_STREAM != 0);
    flags
}

// ── Worker state ─────────────────────────────────────────────────

/// Everything owned by the worker thread.
#[derive(Default)]
struct Codec {
    codec: Option<MediaCodec>,
    /// Kept alive for as long as the codec runs.
    window: Option<NativeWindow>,
    format: Option<EncoderFormat>,
    next_index: usize,
    in_flight: HashSet<usize>,
}

impl Codec {
    fn handle(&self) -> Result<&MediaCodec, MirrorError> {
        self.codec
            .as_ref()
            .ok_or_else(|| MirrorError::Encoder("encoder not configured".into()))
    }

    fn configure(&mut self, format: EncoderFormat) -> Result<(), MirrorError> {
        let codec = MediaCodec::from_encoder_type(&format.mime_type).ok_or_else(|| {
            MirrorError::Encoder(format!("no encoder for {}", format.mime_type))
        })?;

        let mut media = MediaFormat::new();
        media.set_str(KEY_MIME, &format.mime_type);
        media.set_i32(KEY_WIDTH, format.width as i32);
        media.set_i32(KEY_HEIGHT, format.height as i32);
        media.set_i32(KEY_BIT_RATE, format.bit_rate as i32);
        media.set_i32(KEY_FRAME_RATE, format.max_fps.round() as i32);
        media.set_i32(KEY_COLOR_FORMAT, COLOR_FORMAT_SURFACE);
        media.set_i32(KEY_I_FRAME_INTERVAL, format.i_frame_interval_secs as i32);
        media.set_i64(
            KEY_REPEAT_PREVIOUS_FRAME_AFTER,
            format.repeat_previous_frame_us as i64,
        );
        media.set_f32(KEY_MAX_FPS_TO_ENCODER, format.max_fps);

        codec
            .configure(&media, None, MediaCodecDirection::Encoder)
            .map_err(media_err("configure"))?;

        self.codec = Some(codec);
        self.format = Some(format);
        Ok(())
    }

    fn create_input_surface(&mut self) -> Result<InputSurface, MirrorError> {
        let window = self
            .handle()?
            .create_input_surface()
            .map_err(media_err("create input surface"))?;
        let (width, height) = self
            .format
            .as_ref()
            .map(|f| (f.width, f.height))
            .unwrap_or_default();
        self.window = Some(window);
        Ok(InputSurface {
            width,
            height,
            source: "MediaCodec input surface".into(),
        })
    }

    /// Blocking dequeue. The codec buffer is copied out and handed back
    /// at once; the returned index only tracks the caller's release.
    fn dequeue(&mut self, timeout: Duration) -> Result<Option<OutputBuffer>, MirrorError> {
        let codec = self.handle()?;
        let buffer = match codec
            .dequeue_output_buffer(timeout)
            .map_err(media_err("dequeue output"))?
        {
            DequeuedOutputBufferInfoResult::Buffer(buffer) => buffer,
            DequeuedOutputBufferInfoResult::OutputFormatChanged => {
                debug!("output format changed");
                return Ok(None);
            }
            _ => return Ok(None),
        };

        let info = buffer.info();
        let flags = buffer_flags(info.flags());
        let pts_us = info.presentation_time_us();
        let data = Bytes::copy_from_slice(buffer.buffer());
        codec
            .release_output_buffer(buffer, false)
            .map_err(media_err("release output"))?;

        let index = self.next_index;
        self.next_index = self.next_index.wrapping_add(1);
        self.in_flight.insert(index);
        Ok(Some(OutputBuffer {
            index,
            pts_us,
            flags,
            data,
        }))
    }

    fn set_parameters(&mut self, change: ParameterChange) -> Result<(), MirrorError> {
        let mut params = MediaFormat::new();
        match change {
            ParameterChange::RequestSyncFrame => params.set_i32(PARAMETER_REQUEST_SYNC_FRAME, 0),
            ParameterChange::VideoBitrate(bit_rate) => {
                params.set_i32(PARAMETER_VIDEO_BITRATE, bit_rate as i32)
            }
        }
        self.handle()?
            .set_parameters(params)
            .map_err(media_err("set parameters"))
    }

    fn stop(&mut self) -> Result<(), MirrorError> {
        self.in_flight.clear();
        self.window = None;
        match self.codec.take() {
            Some(codec) => codec.stop().map_err(media_err("stop")),
            None => Ok(()),
        }
    }
}

type Job = Box<dyn FnOnce(&mut Codec) + Send>;

// ── MediaCodecEncoder ────────────────────────────────────────────

pub struct MediaCodecEncoder {
    jobs: Option<std_mpsc::Sender<Job>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl MediaCodecEncoder {
    pub fn new() -> Result<Self, MirrorError> {
        let (jobs, queue) = std_mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name("mediacodec".into())
            .spawn(move || {
                let mut codec = Codec::default();
                while let Ok(job) = queue.recv() {
                    job(&mut codec);
                }
                if let Err(e) = codec.stop() {
                    warn!("codec release on shutdown: {e}");
                }
            })
            .map_err(|e| MirrorError::Encoder(format!("codec thread: {e}")))?;

        Ok(Self {
            jobs: Some(jobs),
            worker: Some(worker),
        })
    }

    fn submit(&self, job: Job) -> Result<(), MirrorError> {
        self.jobs
            .as_ref()
            .ok_or(MirrorError::ChannelClosed)?
            .send(job)
            .map_err(|_| MirrorError::ChannelClosed)
    }

    /// Run `f` on the worker and wait for it.
    fn call<T, F>(&self, f: F) -> Result<T, MirrorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Codec) -> Result<T, MirrorError> + Send + 'static,
    {
        let (reply, result) = std_mpsc::sync_channel(1);
        self.submit(Box::new(move |codec| {
            let _ = reply.send(f(codec));
        }))?;
        result.recv().map_err(|_| MirrorError::ChannelClosed)?
    }
}

#[async_trait]
impl VideoEncoder for MediaCodecEncoder {
    fn configure(&mut self, format: &EncoderFormat) -> Result<(), MirrorError> {
        let format = format.clone();
        info!(
            mime = %format.mime_type,
            width = format.width,
            height = format.height,
            max_fps = format.max_fps,
            "configuring MediaCodec"
        );
        self.call(move |codec| codec.configure(format))
    }

    fn create_input_surface(&mut self) -> Result<InputSurface, MirrorError> {
        self.call(Codec::create_input_surface)
    }

    fn start(&mut self) -> Result<(), MirrorError> {
        self.call(|codec| codec.handle()?.start().map_err(media_err("start")))
    }

    async fn dequeue_output(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<OutputBuffer>, MirrorError> {
        let (reply, result) = oneshot::channel();
        self.submit(Box::new(move |codec| {
            let _ = reply.send(codec.dequeue(timeout));
        }))?;
        result.await.map_err(|_| MirrorError::ChannelClosed)?
    }

    fn release_output(&mut self, index: usize) -> Result<(), MirrorError> {
        self.call(move |codec| {
            if codec.in_flight.remove(&index) {
                Ok(())
            } else {
                Err(MirrorError::Encoder(format!("unknown output buffer {index}")))
            }
        })
    }

    fn set_parameters(&mut self, change: ParameterChange) -> Result<(), MirrorError> {
        debug!(?change, "codec parameters");
        self.call(move |codec| codec.set_parameters(change))
    }

    fn stop(&mut self) -> Result<(), MirrorError> {
        let stopped = self.call(Codec::stop);
        self.jobs = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("codec thread panicked");
            }
        }
        stopped
    }
}

impl Drop for MediaCodecEncoder {
    fn drop(&mut self) {
        // Closing the queue ends the worker, which releases the codec.
        self.jobs = None;
    }
}

// ── Tests ────────────────────────────────────────────────────────
