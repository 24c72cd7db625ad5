//! Wire protocol
//!
//! Two kinds of frames share one WebSocket: JSON text frames carry control
//! messages, binary frames carry transcoder output.

pub mod framing;
pub mod message;

pub use framing::{decode_tagged, FrameMode, MediaFrame, OutboundFrame};
pub use message::{ControlMessage, ServerMessage};

/// Error decoding an inbound frame
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not a recognized JSON control message
    #[error("Malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Clients may not send binary frames
    #[error("Binary frames are not accepted from clients")]
    UnexpectedBinary,
}
