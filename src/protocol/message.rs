//! Control messages
//!
//! JSON text frames, internally tagged by `action`.

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// Message sent by a client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Start (or restart) transcoding a camera
    StartStream {
        #[serde(default)]
        id: Option<String>,
        /// `rtspUrl` is the older spelling still sent by some clients
        #[serde(default, rename = "sourceUrl", alias = "rtspUrl")]
        source_url: Option<String>,
    },
    /// Stop transcoding a camera
    StopStream {
        #[serde(default)]
        id: Option<String>,
    },
}

impl ControlMessage {
    /// Decode a text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Message sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Something went wrong with a request or a stream
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        message: String,
    },
}

impl ServerMessage {
    /// Error about a specific stream, or a generic one when `id` is `None`
    pub fn error(id: Option<&str>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            id: id.map(str::to_string),
            message: message.into(),
        }
    }

    /// Encode as a JSON text frame
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
