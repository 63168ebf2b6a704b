use crate::diagnostics::INTERNAL_TARGET;
use crate::document::Document;
use crate::error::StoreError;
use crate::store::DocumentStore;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Embedded store appending documents as JSON lines.
///
/// Each collection maps to `<dir>/<collection>.jsonl`. A batch is written
/// with a single `write_all` so it lands as one contiguous block; if the
/// write fails partway the file is cut back to its previous length, so a
/// retried batch never leaves duplicate lines.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `collection`.
    pub fn collection_path(&self, collection: &str) -> Result<PathBuf, StoreError> {
        if collection.is_empty()
            || collection.contains(|c: char| c == '/' || c == '\\')
            || collection == "."
            || collection == ".."
        {
            return Err(StoreError::permanent(format!("invalid collection name {:?}", collection)));
        }
        Ok(self.dir.join(format!("{}.jsonl", collection)))
    }
}

fn io_error(context: &str, err: std::io::Error) -> StoreError {
    let message = format!("{}: {}", context, err);
    let classified = match err.kind() {
        ErrorKind::PermissionDenied | ErrorKind::InvalidInput | ErrorKind::InvalidData => {
            StoreError::permanent(message)
        }
        _ => StoreError::transient(message),
    };
    classified.with_source(err)
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<usize, StoreError> {
        let path = self.collection_path(collection)?;

        let mut buf = Vec::new();
        for doc in documents {
            serde_json::to_writer(&mut buf, doc)
                .map_err(|e| StoreError::permanent("failed to encode document").with_source(e))?;
            buf.push(b'\n');
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error("create log directory", e))?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error("open collection file", e))?;
        let start = file
            .metadata()
            .await
            .map_err(|e| io_error("read collection file length", e))?
            .len();

        if let Err(e) = append(&mut file, &buf).await {
            return Err(rollback(&mut file, start, io_error("append documents", e)).await);
        }
        Ok(documents.len())
    }
}

async fn append(file: &mut File, buf: &[u8]) -> std::io::Result<()> {
    file.write_all(buf).await?;
    file.flush().await
}

/// Truncate `file` back to `len` after a failed append. If that fails too
/// the lines already written cannot be taken back, and retrying would
/// duplicate them, so the error becomes permanent.
async fn rollback(file: &mut File, len: u64, err: StoreError) -> StoreError {
    match file.set_len(len).await {
        Ok(()) => err,
        Err(truncate) => {
            tracing::error!(
                target: INTERNAL_TARGET,
                error = %truncate,
                "failed to roll back partial append"
            );
            StoreError::permanent(format!("{} (partial write could not be rolled back)", err))
                .with_source(truncate)
        }
    }
}
