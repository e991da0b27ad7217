//! Serialized file writer.
//!
//! Writes are queued on a channel and applied one at a time by a background task, so they
//! never interleave. Each write replaces the whole file through a temp file and a rename.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::utils::fs;
use crate::{Error, Result};

enum WriteOp {
    Write(Vec<u8>),
    Flush(oneshot::Sender<Result<()>>),
}

#[derive(Debug)]
pub struct SafeFileWriter {
    path: PathBuf,
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl SafeFileWriter {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(path.clone(), rx));
        Self { path, tx }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> std::io::Result<String> {
        tokio::fs::read_to_string(&self.path).await
    }

    /// Queue a full replacement of the file with `value` as pretty JSON.
    pub fn schedule_write<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.tx
            .send(WriteOp::Write(bytes))
            .map_err(|_| Error::Other("file writer stopped".to_string()))
    }

    /// Wait for every write queued so far.
    ///
    /// Returns the first failure since the previous flush.
    pub async fn flush(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(WriteOp::Flush(reply))
            .map_err(|_| Error::Other("file writer stopped".to_string()))?;
        done.await
            .map_err(|_| Error::Other("file writer stopped".to_string()))?
    }
}

async fn run_writer(path: PathBuf, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    let mut first_error: Option<Error> = None;

    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Write(bytes) => {
                if let Err(e) = write_atomic(&path, &bytes).await {
                    error!(path = %path.display(), error = %e, "File write failed");
                    first_error.get_or_insert(e);
                }
            }
            WriteOp::Flush(reply) => {
                let _ = reply.send(first_error.take().map_or(Ok(()), Err));
            }
        }
    }

    debug!(path = %path.display(), "File writer stopped");
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::ensure_parent_dir_with_op("creating data directory", path).await?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| Error::persistence("writing", &tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::persistence("replacing", path, e))?;
    Ok(())
}
