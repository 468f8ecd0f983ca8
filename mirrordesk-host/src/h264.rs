//! H.264 decoding to RGBA through libavcodec.

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;
use ffmpeg::util::frame;

use mirrordesk_core::MirrorError;

use crate::decode::DecodedImage;

/// One decoded picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picture {
    /// Timestamp of the packet the picture came from.
    pub pts_us: Option<i64>,
    pub image: DecodedImage,
}

/// A libavcodec H.264 decoder fed with Annex-B access units.
pub struct H264Decoder {
    decoder: ffmpeg::decoder::Video,
}

impl H264Decoder {
    pub fn new() -> Result<Self, MirrorError> {
        let unavailable = |e: ffmpeg::Error| MirrorError::Other(format!("h264 decoder: {e}"));

        ffmpeg::init().map_err(unavailable)?;
        let decoder = ffmpeg::codec::context::Context::new()
            .decoder()
            .open_as(ffmpeg::codec::Id::H264)
            .and_then(|opened| opened.video())
            .map_err(unavailable)?;
        Ok(Self { decoder })
    }

    /// Feed one access unit (or a parameter-set record) and collect
    /// every picture it completes.
    pub fn decode(&mut self, data: &[u8], pts_us: Option<i64>) -> Result<Vec<Picture>, MirrorError> {
        let mut packet = ffmpeg::Packet::copy(data);
        packet.set_pts(pts_us);
        self.decoder.send_packet(&packet).map_err(video_err)?;

        let mut pictures = Vec::new();
        let mut yuv = frame::Video::empty();
        while self.decoder.receive_frame(&mut yuv).is_ok() {
            pictures.push(Picture {
                pts_us: yuv.pts(),
                image: to_rgba(&yuv)?,
            });
        }
        Ok(pictures)
    }
}

fn video_err(e: ffmpeg::Error) -> MirrorError {
    MirrorError::VideoDecode(e.to_string())
}

/// Convert one decoded picture to tightly packed RGBA.
///
/// The scaler is built per picture: it is not `Send`, and the decoder
/// lives inside a spawned reader task.
fn to_rgba(yuv: &frame::Video) -> Result<DecodedImage, MirrorError> {
    let (width, height) = (yuv.width(), yuv.height());
    let mut scaler = scaling::Context::get(
        yuv.format(),
        width,
        height,
        Pixel::RGBA,
        width,
        height,
        scaling::Flags::BILINEAR,
    )
    .map_err(video_err)?;

    let mut rgba = frame::Video::empty();
    scaler.run(yuv, &mut rgba).map_err(video_err)?;

    let row = width as usize * 4;
    let stride = rgba.stride(0);
    let plane = rgba.data(0);
    let mut packed = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let line = plane
            .get(y * stride..y * stride + row)
            .ok_or_else(|| MirrorError::VideoDecode("short RGBA plane".into()))?;
        packed.extend_from_slice(line);
    }

    Ok(DecodedImage {
        width,
        height,
        rgba: Bytes::from(packed),
    })
}
