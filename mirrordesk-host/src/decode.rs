//! Turning parsed stream units into displayable frames.
//!
//! Each capture mode pairs a `tokio_util` codec that finds unit
//! boundaries with a [`FrameDecoder`] that interprets each unit.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::codec::Decoder;

use crate::h264::H264Decoder;
use mirrordesk_core::{
    FrameRecord, ImageStreamDecoder, MirrorCodec, MirrorError, StreamHeader, StreamItem,
};

// ── Frames ───────────────────────────────────────────────────────

/// A decoded still image, 8-bit RGBA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Bytes,
}

/// The compressed unit a video picture was decoded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub pts_us: i64,
    pub key_frame: bool,
    pub data: Bytes,
    /// Codec configuration in effect for this frame.
    pub config: Option<Bytes>,
}

/// The most recent displayable picture of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub image: DecodedImage,
    /// Set when the picture came from the encoded stream.
    pub video: Option<VideoFrame>,
}

impl Frame {
    pub fn image(image: DecodedImage) -> Self {
        Self { image, video: None }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width, self.image.height)
    }
}

/// What one stream unit turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A displayable frame carried `bytes` payload bytes.
    Frame { frame: Frame, bytes: usize },
    Header(StreamHeader),
    /// Payload held by the decoder; no picture came out yet.
    Buffered { bytes: usize },
    /// Consumed without producing anything to show.
    Nothing,
}

// ── FrameDecoder ─────────────────────────────────────────────────

/// Interprets the units produced by its boundary codec.
pub trait FrameDecoder: Send + 'static {
    type Codec: Decoder<Error = MirrorError> + Send + 'static;

    fn codec(&self) -> Self::Codec;

    fn decode(&mut self, unit: <Self::Codec as Decoder>::Item) -> Result<Decoded, MirrorError>;
}

// ── PngFrameDecoder ──────────────────────────────────────────────

/// Image-loop mode: each unit is a complete PNG file.
#[derive(Debug, Clone)]
pub struct PngFrameDecoder {
    max_image_len: usize,
}

impl PngFrameDecoder {
    pub fn new(max_image_len: usize) -> Self {
        Self { max_image_len }
    }
}

impl FrameDecoder for PngFrameDecoder {
    type Codec = ImageStreamDecoder;

    fn codec(&self) -> ImageStreamDecoder {
        ImageStreamDecoder::png().max_image_len(self.max_image_len)
    }

    fn decode(&mut self, unit: Bytes) -> Result<Decoded, MirrorError> {
        let image = decode_png(&unit)?;
        Ok(Decoded::Frame {
            frame: Frame::image(image),
            bytes: unit.len(),
        })
    }
}

/// Decode a PNG file into 8-bit RGBA.
pub fn decode_png(data: &[u8]) -> Result<DecodedImage, MirrorError> {
    let err = |e: png::DecodingError| MirrorError::ImageDecode(e.to_string());

    let mut decoder = png::Decoder::new(data);
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info().map_err(err)?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf).map_err(err)?;
    buf.truncate(info.buffer_size());

    let rgba = match info.color_type {
        png::ColorType::Rgba => buf,
        png::ColorType::Rgb => buf
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 0xFF])
            .collect(),
        png::ColorType::GrayscaleAlpha => buf
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        png::ColorType::Grayscale => buf.iter().flat_map(|&g| [g, g, g, 0xFF]).collect(),
        png::ColorType::Indexed => {
            return Err(MirrorError::ImageDecode(
                "indexed colour survived expansion".into(),
            ));
        }
    };

    Ok(DecodedImage {
        width: info.width,
        height: info.height,
        rgba: Bytes::from(rgba),
    })
}

// ── VideoFrameDecoder ────────────────────────────────────────────

/// Pending pictures the decoder may still be holding.
const MAX_PENDING: usize = 16;

/// Encoded mode: header, codec config, then compressed H.264 frames.
///
/// A config record is handed to the decoder once and attached to every
/// later frame as extra data. Each frame is decoded to RGBA; the record
/// it came from rides along with the picture.
pub struct VideoFrameDecoder {
    max_payload: usize,
    config: Option<Bytes>,
    h264: Option<H264Decoder>,
    /// Records sent to the decoder whose picture has not come out.
    pending: VecDeque<VideoFrame>,
}

impl VideoFrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            config: None,
            h264: None,
            pending: VecDeque::new(),
        }
    }

    fn h264(&mut self) -> Result<&mut H264Decoder, MirrorError> {
        if self.h264.is_none() {
            self.h264 = Some(H264Decoder::new()?);
        }
        self.h264
            .as_mut()
            .ok_or_else(|| MirrorError::Other("h264 decoder missing".into()))
    }

    fn frame(&mut self, record: FrameRecord) -> Result<Decoded, MirrorError> {
        if record.kind.is_config() {
            self.h264()?.decode(&record.payload, None)?;
            self.config = Some(record.payload);
            return Ok(Decoded::Nothing);
        }

        let bytes = record.payload.len();
        let pts_us = record.kind.pts_us().unwrap_or_default();
        let pictures = self.h264()?.decode(&record.payload, Some(pts_us))?;

        if self.pending.len() == MAX_PENDING {
            self.pending.pop_front();
        }
        self.pending.push_back(VideoFrame {
            pts_us,
            key_frame: record.kind.is_key_frame(),
            data: record.payload,
            config: self.config.clone(),
        });

        // Only the newest picture is shown; older ones still retire
        // their pending records.
        let mut latest = None;
        for picture in pictures {
            let source = self.take_pending(picture.pts_us);
            latest = Some(Frame {
                image: picture.image,
                video: source,
            });
        }
        Ok(match latest {
            Some(frame) => Decoded::Frame { frame, bytes },
            None => Decoded::Buffered { bytes },
        })
    }

    /// Remove and return the pending record with `pts_us`, dropping any
    /// older record the decoder skipped.
    fn take_pending(&mut self, pts_us: Option<i64>) -> Option<VideoFrame> {
        let Some(pts_us) = pts_us else {
            return self.pending.pop_front();
        };
        let at = self.pending.iter().position(|v| v.pts_us == pts_us)?;
        self.pending.drain(..at);
        self.pending.pop_front()
    }
}

impl FrameDecoder for VideoFrameDecoder {
    type Codec = MirrorCodec;

    fn codec(&self) -> MirrorCodec {
        MirrorCodec::with_sync_byte().max_payload(self.max_payload)
    }

    fn decode(&mut self, unit: StreamItem) -> Result<Decoded, MirrorError> {
        match unit {
            StreamItem::Header(h) => Ok(Decoded::Header(h)),
            StreamItem::Frame(record) => self.frame(record),
        }
    }
}

/// Shared handle to the latest frame.
pub type SharedFrame = Arc<Frame>;

// ── Tests ────────────────────────────────────────────────────────
