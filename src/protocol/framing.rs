//! Outbound frame types and binary framing
//!
//! In [`FrameMode::Raw`] a binary frame is the transcoder output verbatim,
//! and the client assumes it belongs to the stream it started last on that
//! connection. [`FrameMode::Tagged`] prefixes each chunk with its stream id:
//!
//! ```text
//! +----------------+-----------------+-----------------+
//! | id length (u16 | id (UTF-8)      | chunk           |
//! | big endian)    |                 |                 |
//! +----------------+-----------------+-----------------+
//! ```
//!
//! Media frames carry the shutdown signal of the stream that produced them.
//! Frames still queued when their stream is stopped or replaced are stale and
//! never reach the socket.

use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::watch;

/// Frame queued for a connection's writer
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// JSON control message
    Text(String),
    /// Media data
    Binary(MediaFrame),
}

impl OutboundFrame {
    /// Whether the writer should drop this frame instead of sending it
    pub fn is_stale(&self) -> bool {
        match self {
            OutboundFrame::Text(_) => false,
            OutboundFrame::Binary(media) => media.is_stale(),
        }
    }
}

/// One encoded chunk of a stream's output
#[derive(Debug, Clone)]
pub struct MediaFrame {
    data: Bytes,
    stopped: watch::Receiver<bool>,
}

impl MediaFrame {
    /// Wrap `data`, going stale once `stopped` turns `true`
    pub fn new(data: Bytes, stopped: watch::Receiver<bool>) -> Self {
        Self { data, stopped }
    }

    /// Encoded payload
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Take the payload
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// The producing stream was stopped or replaced
    ///
    /// A stream that ended on its own drops its signal without setting it, so
    /// its remaining output is still delivered.
    pub fn is_stale(&self) -> bool {
        *self.stopped.borrow()
    }
}

/// Binary framing used on a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameMode {
    /// Chunks sent as-is
    #[default]
    Raw,
    /// Chunks prefixed with the stream id
    Tagged,
}

impl FrameMode {
    /// Wrap a chunk of `id`'s output
    pub fn encode(&self, id: &str, chunk: Bytes) -> Bytes {
        match self {
            FrameMode::Raw => chunk,
            FrameMode::Tagged => {
                // ids are capped well below u16::MAX at validation time
                let id = &id.as_bytes()[..id.len().min(u16::MAX as usize)];
                let mut buf = BytesMut::with_capacity(2 + id.len() + chunk.len());
                buf.put_u16(id.len() as u16);
                buf.put_slice(id);
                buf.put_slice(&chunk);
                buf.freeze()
            }
        }
    }
}

impl FromStr for FrameMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(FrameMode::Raw),
            "tagged" => Ok(FrameMode::Tagged),
            other => Err(format!("unknown frame mode '{}'", other)),
        }
    }
}

/// Split a tagged frame into stream id and chunk
pub fn decode_tagged(frame: &[u8]) -> Option<(&str, &[u8])> {
    if frame.len() < 2 {
        return None;
    }
    let len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    let rest = &frame[2..];
    if rest.len() < len {
        return None;
    }
    let id = std::str::from_utf8(&rest[..len]).ok()?;
    Some((id, &rest[len..]))
}
