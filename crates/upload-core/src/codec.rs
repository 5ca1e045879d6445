//! JSON text-frame codec for the upload protocol.
//!
//! Wire format: one UTF-8 JSON object per WebSocket text frame, carrying a
//! string `type` tag plus the fields of that message kind.

use crate::error::{UploadError, UploadResult};
use crate::messages::{FileChunk, FileMeta, Inbound, MessageKind, Response};
use serde_json::{Map, Value};

/// Decode one inbound text frame into a typed message.
pub fn decode_frame(text: &str) -> UploadResult<Inbound> {
    let value: Value =
        serde_json::from_str(text).map_err(|_| UploadError::Protocol("invalid format".into()))?;
    let Value::Object(fields) = value else {
        return Err(UploadError::Protocol("invalid format".into()));
    };

    let kind: MessageKind = match fields.get("type") {
        Some(Value::String(tag)) => tag.parse()?,
        Some(_) => return Err(invalid_value("type")),
        None => return Err(missing_key("type")),
    };

    match kind {
        MessageKind::FileMeta => Ok(Inbound::Meta(FileMeta {
            file_name: string_field(&fields, "file_name")?,
            file_size: size_field(&fields, "file_size")?,
        })),
        MessageKind::FileChunk => Ok(Inbound::Chunk(FileChunk {
            chunk: string_field(&fields, "chunk")?,
        })),
    }
}

/// Encode an outbound envelope as a JSON text frame.
pub fn encode_response(response: &Response) -> UploadResult<String> {
    serde_json::to_string(response).map_err(|e| UploadError::Unexpected(e.to_string()))
}

fn string_field(fields: &Map<String, Value>, key: &str) -> UploadResult<String> {
    match fields.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(invalid_value(key)),
        None => Err(missing_key(key)),
    }
}

fn size_field(fields: &Map<String, Value>, key: &str) -> UploadResult<u64> {
    match fields.get(key) {
        Some(v) => v.as_u64().ok_or_else(|| invalid_value(key)),
        None => Err(missing_key(key)),
    }
}

fn missing_key(key: &str) -> UploadError {
    UploadError::Protocol(format!("missing key: {key}"))
}

fn invalid_value(key: &str) -> UploadError {
    UploadError::Protocol(format!("invalid value for {key}"))
}
