//! Per-connection message dispatcher.
//!
//! A [`Session`] owns at most one [`TransferState`]. Every inbound frame is
//! gated by the shared limiter, decoded, routed by message kind, and turned
//! into exactly one outbound envelope. Errors never escape: they become
//! `error` envelopes, and only a rate-limit rejection closes the connection.

use crate::limiter::{Admit, Decision};
use crate::storage::FileStore;
use crate::transfer::{Progress, TransferState, UploadPolicy};
use std::sync::Arc;
use tracing::{debug, info, warn};
use upload_core::{decode_frame, FileChunk, FileMeta, Inbound, MessageKind, Response, UploadError, UploadResult};

/// What the connection loop should do after a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Send the response and keep reading.
    Continue(Response),
    /// Send the response, then close with a policy-violation status.
    Close(Response),
}

impl Disposition {
    pub fn response(&self) -> &Response {
        match self {
            Disposition::Continue(r) | Disposition::Close(r) => r,
        }
    }
}

/// Where the session's current transfer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transfer in flight.
    Idle,
    /// Metadata accepted, no chunk yet.
    MetaReceived,
    /// At least one chunk accepted.
    Receiving,
}

/// State and collaborators for one connection.
pub struct Session {
    /// Client identity used for rate limiting.
    client: String,
    policy: Arc<UploadPolicy>,
    limiter: Arc<dyn Admit>,
    store: Arc<dyn FileStore>,
    transfer: Option<TransferState>,
}

impl Session {
    pub fn new(
        client: impl Into<String>,
        policy: Arc<UploadPolicy>,
        limiter: Arc<dyn Admit>,
        store: Arc<dyn FileStore>,
    ) -> Self {
        Self {
            client: client.into(),
            policy,
            limiter,
            store,
            transfer: None,
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.transfer {
            None => SessionState::Idle,
            Some(t) if t.chunks() == 0 => SessionState::MetaReceived,
            Some(_) => SessionState::Receiving,
        }
    }

    pub fn transfer(&self) -> Option<&TransferState> {
        self.transfer.as_ref()
    }

    /// Handle one inbound text frame.
    pub async fn handle_frame(&mut self, frame: &str) -> Disposition {
        if let Err(e) = self.gate().await {
            return self.fail(None, e);
        }

        let message = match decode_frame(frame) {
            Ok(m) => m,
            Err(e) => return self.fail(None, e),
        };

        let kind = message.kind();
        let result = match message {
            Inbound::Meta(meta) => self.handle_metadata(meta),
            Inbound::Chunk(chunk) => self.handle_chunk(chunk).await,
        };

        match result {
            Ok(response) => Disposition::Continue(response),
            Err(e) => self.fail(Some(kind), e),
        }
    }

    /// Handle a binary frame; the protocol only carries text.
    pub async fn handle_binary(&mut self, len: usize) -> Disposition {
        if let Err(e) = self.gate().await {
            return self.fail(None, e);
        }
        debug!(client = %self.client, len, "binary frame rejected");
        self.fail(None, UploadError::Protocol("invalid format".into()))
    }

    /// Handle a frame that exceeded the transport size limit.
    pub async fn handle_oversized(&mut self, len: usize) -> Disposition {
        if let Err(e) = self.gate().await {
            return self.fail(None, e);
        }
        self.fail(None, UploadError::Protocol(format!("frame too large: {len} bytes")))
    }

    async fn gate(&self) -> UploadResult<()> {
        match self.limiter.admit(&self.client).await? {
            Decision::Allow => Ok(()),
            Decision::Reject => Err(UploadError::RateLimitExceeded),
        }
    }

    /// Start a new transfer, replacing any transfer already in flight.
    ///
    /// The replaced transfer's bytes are dropped, never merged or persisted.
    /// A rejected metadata message leaves the current transfer in place.
    fn handle_metadata(&mut self, meta: FileMeta) -> UploadResult<Response> {
        let state = TransferState::begin(&meta, &self.policy)?;
        if let Some(previous) = self.transfer.replace(state) {
            debug!(
                client = %self.client,
                file_name = %previous.file_name(),
                received = previous.received_size(),
                "abandoned in-flight transfer"
            );
        }
        info!(
            client = %self.client,
            file_name = %meta.file_name,
            file_size = meta.file_size,
            "file metadata received, ready to accept file"
        );
        Ok(Response::meta_received())
    }

    async fn handle_chunk(&mut self, chunk: FileChunk) -> UploadResult<Response> {
        let transfer = self.transfer.as_mut().ok_or(UploadError::NoActiveTransfer)?;

        match transfer.append(&chunk.chunk)? {
            Progress::Partial => {
                debug!(
                    client = %self.client,
                    received = transfer.received_size(),
                    declared = transfer.declared_size(),
                    "chunk received"
                );
                Ok(Response::chunk_received())
            }
            Progress::Complete => {
                // The transfer ends here whether or not persisting succeeds.
                let done = self.transfer.take().ok_or(UploadError::NoActiveTransfer)?;
                let path = self
                    .store
                    .save(done.file_name(), done.bytes())
                    .await
                    .map_err(|e| UploadError::Unexpected(format!("could not save file: {e}")))?;
                info!(
                    client = %self.client,
                    path = %path.display(),
                    extension = %done.extension(),
                    bytes = done.received_size(),
                    "file received"
                );
                Ok(Response::file_received(done.file_name(), done.extension()))
            }
        }
    }

    fn fail(&self, kind: Option<MessageKind>, err: UploadError) -> Disposition {
        warn!(
            client = %self.client,
            kind = kind.map(|k| k.as_str()),
            error = %err,
            "sending error to client"
        );
        let response = Response::from(&err);
        if err.closes_connection() {
            Disposition::Close(response)
        } else {
            Disposition::Continue(response)
        }
    }
}
