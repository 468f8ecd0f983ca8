//! Capture stream wire protocol.
//!
//! A session on the wire is an optional sync byte, one
//! [`StreamHeader`], then a sequence of [`FrameRecord`]s until the
//! connection closes. All integers are big-endian.

pub mod codec;
pub mod frame;
pub mod header;

pub use codec::{
    DEFAULT_MAX_PAYLOAD, MirrorCodec, StreamItem, WRITE_CHUNK_SIZE, write_frame, write_header,
    write_sync_byte,
};
pub use frame::{FRAME_META_SIZE, FrameKind, FrameMeta, FrameRecord};
pub use header::{CodecId, HEADER_SIZE, StreamHeader};
