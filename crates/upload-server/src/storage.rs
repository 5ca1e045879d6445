//! Persistence of completed uploads.

use futures_util::future::BoxFuture;
use std::path::PathBuf;
use tracing::info;
use upload_core::UploadResult;

/// Destination for completed files.
pub trait FileStore: Send + Sync {
    /// Persist `bytes` under `file_name`, returning the written path.
    fn save<'a>(&'a self, file_name: &'a str, bytes: &'a [u8]) -> BoxFuture<'a, UploadResult<PathBuf>>;
}

/// Writes files to `<root>/<file_name>`, creating directories on demand.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileStore for DiskStore {
    fn save<'a>(&'a self, file_name: &'a str, bytes: &'a [u8]) -> BoxFuture<'a, UploadResult<PathBuf>> {
        Box::pin(async move {
            let path = self.root.join(file_name);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            info!(path = %path.display(), bytes = bytes.len(), "saving file");
            tokio::fs::write(&path, bytes).await?;
            Ok(path)
        })
    }
}
