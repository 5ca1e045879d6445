//! Upload protocol messages.
//!
//! Inbound frames carry a string `type` tag plus type-specific fields.
//! Outbound envelopes are serialized with the same `type` tag convention.

use crate::error::UploadError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Inbound message kinds accepted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    FileMeta,
    FileChunk,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::FileMeta => "file_meta",
            MessageKind::FileChunk => "file_chunk",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file_meta" => Ok(MessageKind::FileMeta),
            "file_chunk" => Ok(MessageKind::FileChunk),
            other => Err(UploadError::InvalidMessageType(other.to_string())),
        }
    }
}

/// `file_meta` payload: announces a new file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub file_name: String,
    /// Declared size in bytes.
    pub file_size: u64,
}

/// `file_chunk` payload: one base64 fragment of file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    pub chunk: String,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Meta(FileMeta),
    Chunk(FileChunk),
}

impl Inbound {
    pub fn kind(&self) -> MessageKind {
        match self {
            Inbound::Meta(_) => MessageKind::FileMeta,
            Inbound::Chunk(_) => MessageKind::FileChunk,
        }
    }
}

/// Outbound envelope sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Error { message: String },
    MetaReceived { message: String },
    ChunkReceived { message: String },
    FileReceived { message: String, extension: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    pub fn meta_received() -> Self {
        Response::MetaReceived {
            message: "Ready to receive file".into(),
        }
    }

    pub fn chunk_received() -> Self {
        Response::ChunkReceived {
            message: "Ready for next chunk".into(),
        }
    }

    pub fn file_received(file_name: &str, extension: &str) -> Self {
        Response::FileReceived {
            message: format!(
                "File {file_name} received successfully and file extension is `{extension}`"
            ),
            extension: extension.to_string(),
        }
    }

    /// The wire `type` tag of this envelope.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Response::Error { .. } => "error",
            Response::MetaReceived { .. } => "meta_received",
            Response::ChunkReceived { .. } => "chunk_received",
            Response::FileReceived { .. } => "file_received",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Response::Error { message }
            | Response::MetaReceived { message }
            | Response::ChunkReceived { message }
            | Response::FileReceived { message, .. } => message,
        }
    }
}

impl From<&UploadError> for Response {
    fn from(e: &UploadError) -> Self {
        Response::error(e.to_string())
    }
}
