//! In-flight file transfer: validation, chunk assembly, completion.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::PathBuf;
use upload_core::names::{file_extension, is_usable_file_name, sanitize_file_name};
use upload_core::{FileMeta, UploadError, UploadResult};

/// Upload policy applied to every `file_meta` message.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Maximum declared size in bytes.
    pub max_size: u64,
    /// Accepted extensions, without the dot. Matching is case-sensitive.
    pub allowed_extensions: Vec<String>,
    /// Directory completed files are written to.
    pub save_directory: PathBuf,
}

impl UploadPolicy {
    pub fn allows_extension(&self, extension: &str) -> bool {
        self.allowed_extensions.iter().any(|e| e == extension)
    }
}

/// Result of appending a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Partial,
    Complete,
}

/// One file being received on a connection.
#[derive(Debug)]
pub struct TransferState {
    file_name: String,
    extension: String,
    declared_size: u64,
    received_size: u64,
    chunks: usize,
    buffer: Vec<u8>,
}

impl TransferState {
    /// Validate a `file_meta` message and start a new transfer.
    ///
    /// Checks run in order: declared size, extension of the raw name, then
    /// the sanitized name.
    pub fn begin(meta: &FileMeta, policy: &UploadPolicy) -> UploadResult<Self> {
        if meta.file_size > policy.max_size {
            return Err(UploadError::Validation(format!(
                "file size {} bytes exceeds the maximum allowed size of {} bytes",
                meta.file_size, policy.max_size
            )));
        }

        let extension = file_extension(&meta.file_name);
        if !policy.allows_extension(extension) {
            return Err(UploadError::Validation(format!(
                "invalid file extension: `{extension}`"
            )));
        }

        let file_name = sanitize_file_name(&meta.file_name);
        if !is_usable_file_name(&file_name) {
            return Err(UploadError::Validation("invalid file name".into()));
        }

        Ok(Self {
            extension: file_extension(&file_name).to_string(),
            file_name,
            declared_size: meta.file_size,
            received_size: 0,
            chunks: 0,
            buffer: Vec::new(),
        })
    }

    /// Decode and append one base64 chunk.
    ///
    /// A chunk that would carry the transfer past its declared size is
    /// rejected and leaves the state untouched.
    pub fn append(&mut self, chunk: &str) -> UploadResult<Progress> {
        let bytes = decode_chunk(chunk)?;
        let len = bytes.len() as u64;
        if self.received_size + len > self.declared_size {
            return Err(UploadError::Validation(format!(
                "chunk exceeds declared file size: {} + {} > {} bytes",
                self.received_size, len, self.declared_size
            )));
        }

        self.buffer.extend_from_slice(&bytes);
        self.received_size += len;
        self.chunks += 1;

        if self.is_complete() {
            Ok(Progress::Complete)
        } else {
            Ok(Progress::Partial)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received_size >= self.declared_size
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    pub fn received_size(&self) -> u64 {
        self.received_size
    }

    /// Number of chunks accepted so far.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }
}

/// Decode one base64 chunk (standard alphabet, padded).
pub fn decode_chunk(chunk: &str) -> UploadResult<Vec<u8>> {
    STANDARD
        .decode(chunk)
        .map_err(|e| UploadError::Decode(format!("invalid base64 chunk: {e}")))
}
