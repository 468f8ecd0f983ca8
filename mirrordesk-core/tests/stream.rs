//! A capture session written by the device-side
//! helpers and read back through the host-side decoders over an
//! in-memory duplex pipe.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use mirrordesk_core::protocol::{write_frame, write_header, write_sync_byte};
use mirrordesk_core::{
    CodecId, FrameKind, ImageStreamDecoder, MirrorCodec, MirrorError, PNG_SIGNATURE, StreamHeader,
    StreamItem,
};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::FramedRead;

// ── Helpers ──────────────────────────────────────────────────────

fn png_like(seed: u8, len: usize) -> Vec<u8> {
    let mut out = PNG_SIGNATURE.to_vec();
    for (tag, data) in [(b"IHDR", vec![seed; 13]), (b"IDAT", vec![seed; len]), (b"IEND", vec![])] {
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(tag);
        out.extend_from_slice(&data);
        out.extend_from_slice(&[0; 4]);
    }
    out
}

// ── Protocol stream ──────────────────────────────────────────────

#[tokio::test]
async fn config_key_delta_arrive_in_order() {
    let (mut device, host) = tokio::io::duplex(256);

    let writer = tokio::spawn(async move {
        write_sync_byte(&mut device).await;
        write_header(&mut device, &StreamHeader::new(CodecId::H264, 1280, 720))
            .await
            .unwrap();
        write_frame(&mut device, FrameKind::Config, b"\x00\x00\x00\x01\x67sps")
            .await
            .unwrap();
        write_frame(&mut device, FrameKind::KeyFrame(1000), &[0xAA; 700])
            .await
            .unwrap();
        write_frame(&mut device, FrameKind::DeltaFrame(2000), &[0xBB; 300])
            .await
            .unwrap();
    });

    let items: Vec<StreamItem> = tokio::time::timeout(
        Duration::from_secs(5),
        FramedRead::new(host, MirrorCodec::with_sync_byte())
            .map(|r| r.unwrap())
            .collect(),
    )
    .await
    .expect("timeout");
    writer.await.unwrap();

    assert_eq!(items.len(), 4);
    assert_eq!(
        items[0],
        StreamItem::Header(StreamHeader::new(CodecId::H264, 1280, 720))
    );

    let frames: Vec<_> = items[1..]
        .iter()
        .map(|item| match item {
            StreamItem::Frame(f) => f.clone(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(frames[0].kind, FrameKind::Config);
    let displayable: Vec<_> = frames.iter().filter(|f| !f.kind.is_config()).collect();
    assert_eq!(
        displayable.iter().map(|f| f.kind.pts_us()).collect::<Vec<_>>(),
        vec![Some(1000), Some(2000)]
    );
    assert!(displayable[0].kind.is_key_frame());
    let payload_total: usize = displayable.iter().map(|f| f.payload.len()).sum();
    assert_eq!(payload_total, 1000);
}

#[tokio::test]
async fn connection_dropped_mid_payload_ends_stream() {
    let (mut device, host) = tokio::io::duplex(1024);
    let header = StreamHeader::new(CodecId::H264, 8, 8);

    let writer = tokio::spawn(async move {
        write_header(&mut device, &header).await.unwrap();
        // Metadata promises 100 bytes; only 10 arrive.
        let mut meta = Vec::new();
        meta.extend_from_slice(&FrameKind::DeltaFrame(1).to_wire().to_be_bytes());
        meta.extend_from_slice(&100u32.to_be_bytes());
        device.write_all(&meta).await.unwrap();
        device.write_all(&[0u8; 10]).await.unwrap();
    });

    let mut frames = FramedRead::new(host, MirrorCodec::new());
    assert_eq!(
        frames.next().await.unwrap().unwrap(),
        StreamItem::Header(header)
    );
    writer.await.unwrap();

    let err = frames.next().await.unwrap().unwrap_err();
    assert!(err.is_stream_end(), "{err}");
    assert!(frames.next().await.is_none());
}

#[tokio::test]
async fn truncated_header_is_malformed() {
    let reader = tokio_test::io::Builder::new().read(b"h264\x00\x00").build();
    let mut frames = FramedRead::new(reader, MirrorCodec::new());
    let err = frames.next().await.unwrap().unwrap_err();
    assert!(matches!(err, MirrorError::MalformedHeader(6)));
}

// ── Image stream ─────────────────────────────────────────────────

#[tokio::test]
async fn image_loop_survives_noise_between_captures() {
    let images: Vec<Vec<u8>> = (0..3u8).map(|i| png_like(i, 1000 * (i as usize + 1))).collect();

    let mut builder = tokio_test::io::Builder::new();
    builder.read(b"WARNING: linker noise\n");
    for img in &images {
        for piece in img.chunks(333) {
            builder.read(piece);
        }
        builder.read(b"\r\n");
    }
    let reader = builder.build();

    let out: Vec<Bytes> = FramedRead::new(reader, ImageStreamDecoder::png())
        .map(|r| r.unwrap())
        .collect()
        .await;

    assert_eq!(out.len(), 3);
    for (got, want) in out.iter().zip(&images) {
        assert_eq!(&got[..], &want[..]);
    }
}
