//! upload-core: Shared protocol library for chunked WebSocket uploads.
//!
//! Provides the JSON message types, the text-frame codec, the error
//! taxonomy, and file-name sanitization used by the upload server.

pub mod codec;
pub mod error;
pub mod messages;
pub mod names;

// Re-export commonly used items at crate root.
pub use codec::{decode_frame, encode_response};
pub use error::{UploadError, UploadResult};
pub use messages::{FileChunk, FileMeta, Inbound, MessageKind, Response};
pub use names::{file_extension, sanitize_file_name};
