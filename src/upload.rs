// src/upload.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Streaming upload bridge: incremental, blocking writes on the caller side,
//! one whole-object put on the backend side.
//!
//! The caller's [`ObjectWriter`] pushes chunks into a bounded channel. An
//! upload task spawned on the worker pool drains it, starting immediately:
//!
//! - **known length**: the channel is streamed straight into the put, with
//!   the byte count checked against the declared length;
//! - **unknown length**: bytes are gathered in memory up to a ceiling; beyond
//!   it they spill to a temp file which is uploaded and then removed.
//!
//! The channel bound gives backpressure: a write blocks while the pipe is
//! full. [`ObjectWriter::close`] waits for the upload task and returns its
//! failure, so a successful close means the object was written.

use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use bytes::{Bytes, BytesMut};
use futures::executor::block_on;
use futures::stream::{self, Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::constants::{PIPE_CHUNK_SIZE, SPILL_FILE_PREFIX, SPILL_FILE_SUFFIX};
use crate::error::{FsError, Result};
use crate::filesystem::{Resource, ResourceId, S3FileSystem};
use crate::object_client::{
    BodySource, ByteChunkStream, ClientError, ObjectClient, PutRequest, RequestBody,
};
use crate::options::{Existence, WriteOptions};
use crate::path::S3Path;
use crate::runtime::WorkerPool;

/// Where an upload goes and how the put is made.
#[derive(Debug, Clone)]
struct UploadTarget {
    bucket: String,
    key: String,
    display: String,
    content_type: Option<String>,
    if_none_match: bool,
}

impl UploadTarget {
    fn request(&self) -> PutRequest {
        PutRequest {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            if_none_match: self.if_none_match,
        }
    }

    fn failed(&self, reason: impl fmt::Display) -> FsError {
        FsError::UploadFailed { target: self.display.clone(), reason: reason.to_string() }
    }

    fn translate(&self, err: ClientError) -> FsError {
        match err {
            ClientError::PreconditionFailed(_) => FsError::AlreadyExists(self.display.clone()),
            other => self.failed(FsError::from_client(other, &self.display)),
        }
    }
}

#[derive(Debug, Clone)]
struct SpillSettings {
    memory_ceiling: usize,
    dir: Option<PathBuf>,
}

// -----------------------------------------------------------------------------
// Upload task (runs on the worker pool)
// -----------------------------------------------------------------------------

async fn run_upload(
    client: Arc<dyn ObjectClient>,
    target: UploadTarget,
    content_length: Option<u64>,
    spill: SpillSettings,
    rx: mpsc::Receiver<io::Result<Bytes>>,
) -> Result<()> {
    match content_length {
        Some(len) => upload_known_length(client, target, len, rx).await,
        None => upload_unknown_length(client, target, spill, rx).await,
    }
}

/// Stream the pipe straight into one put of `declared` bytes.
async fn upload_known_length(
    client: Arc<dyn ObjectClient>,
    target: UploadTarget,
    declared: u64,
    mut rx: mpsc::Receiver<io::Result<Bytes>>,
) -> Result<()> {
    // Peek so an immediately-ended pipe becomes an empty body, not a stream.
    let body = match rx.recv().await {
        None if declared == 0 => RequestBody::new(0, target.content_type.clone(), BodySource::Bytes(Bytes::new())),
        None => {
            return Err(target.failed(format!("stream ended after 0 of {declared} declared bytes")));
        }
        Some(Err(e)) => return Err(target.failed(e)),
        Some(Ok(first)) => {
            let chunks = stream::iter(Some(Ok(first))).chain(ReceiverStream::new(rx));
            RequestBody::new(
                declared,
                target.content_type.clone(),
                BodySource::Stream(length_checked(chunks, declared)),
            )
        }
    };
    debug!("Uploading {} as a {} byte stream", target.display, declared);
    client
        .put_object(target.request(), body)
        .await
        .map(|_| ())
        .map_err(|e| target.translate(e))
}

/// Fail the stream as soon as it runs past `declared` bytes, or at its end
/// if it falls short.
fn length_checked<S>(chunks: S, declared: u64) -> ByteChunkStream
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    stream::unfold((chunks.boxed(), 0u64, false), move |(mut chunks, seen, done)| async move {
        if done {
            return None;
        }
        match chunks.next().await {
            Some(Err(e)) => Some((Err(e), (chunks, seen, true))),
            Some(Ok(chunk)) => {
                let seen = seen + chunk.len() as u64;
                if seen > declared {
                    let err = io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("wrote more than the {declared} declared bytes"),
                    );
                    Some((Err(err), (chunks, seen, true)))
                } else {
                    Some((Ok(chunk), (chunks, seen, false)))
                }
            }
            None if seen != declared => {
                let err = io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {seen} of {declared} declared bytes"),
                );
                Some((Err(err), (chunks, seen, true)))
            }
            None => None,
        }
    })
    .boxed()
}

/// Buffer in memory up to the ceiling; spill to a temp file past it.
async fn upload_unknown_length(
    client: Arc<dyn ObjectClient>,
    target: UploadTarget,
    spill: SpillSettings,
    mut rx: mpsc::Receiver<io::Result<Bytes>>,
) -> Result<()> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = rx.recv().await {
        let chunk = chunk.map_err(|e| target.failed(e))?;
        if buffer.len() + chunk.len() > spill.memory_ceiling {
            return upload_spilled(client, target, spill, buffer.freeze(), chunk, rx).await;
        }
        buffer.extend_from_slice(&chunk);
    }

    let data = buffer.freeze();
    debug!("Uploading {} from memory ({} bytes)", target.display, data.len());
    let body = RequestBody::from_bytes(data, target.content_type.clone());
    client
        .put_object(target.request(), body)
        .await
        .map(|_| ())
        .map_err(|e| target.translate(e))
}

async fn upload_spilled(
    client: Arc<dyn ObjectClient>,
    target: UploadTarget,
    spill: SpillSettings,
    buffered: Bytes,
    overflow: Bytes,
    mut rx: mpsc::Receiver<io::Result<Bytes>>,
) -> Result<()> {
    // File creation and removal are blocking calls; keep them off the reactor.
    let dir = spill.dir.clone();
    let named = tokio::task::spawn_blocking(move || {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SPILL_FILE_PREFIX).suffix(SPILL_FILE_SUFFIX);
        match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    })
    .await
    .map_err(io::Error::other)
    .and_then(|created| created)
    .map_err(|e| target.failed(format!("cannot create spill file: {e}")))?;
    let (file, spill_path) = named.into_parts();
    debug!(
        "Upload of {} exceeded {} bytes; spilling to {}",
        target.display,
        spill.memory_ceiling,
        spill_path.display()
    );

    let result = async {
        let mut file = tokio::fs::File::from_std(file);
        let mut length = 0u64;
        for chunk in [buffered, overflow] {
            file.write_all(&chunk).await?;
            length += chunk.len() as u64;
        }
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            length += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);
        Ok::<_, io::Error>(length)
    }
    .await;

    let result = match result {
        Ok(length) => {
            debug!("Uploading {} from spill file ({} bytes)", target.display, length);
            let body = RequestBody::new(
                length,
                target.content_type.clone(),
                BodySource::File(spill_path.to_path_buf()),
            );
            client
                .put_object(target.request(), body)
                .await
                .map(|_| ())
                .map_err(|e| target.translate(e))
        }
        Err(e) => Err(target.failed(format!("cannot write spill file: {e}"))),
    };

    let shown = spill_path.display().to_string();
    let removed = tokio::task::spawn_blocking(move || spill_path.close())
        .await
        .map_err(io::Error::other)
        .and_then(|closed| closed);
    match removed {
        Ok(()) => debug!("Removed spill file {}", shown),
        Err(e) => warn!("Failed to remove spill file {}: {}", shown, e),
    }
    result
}

// -----------------------------------------------------------------------------
// Caller side
// -----------------------------------------------------------------------------

enum WriterState {
    Open {
        tx: mpsc::Sender<io::Result<Bytes>>,
        done: oneshot::Receiver<Result<()>>,
        pending: BytesMut,
    },
    Closed,
}

struct WriterShared {
    target: UploadTarget,
    fs: Weak<S3FileSystem>,
    client: Arc<dyn ObjectClient>,
    pool: Arc<WorkerPool>,
    resource_id: OnceLock<ResourceId>,
    delete_on_close: bool,
    state: Mutex<WriterState>,
}

impl WriterShared {
    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broken_pipe(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::BrokenPipe,
            format!("upload of {} has terminated; close the writer for the cause", self.target.display),
        )
    }

    fn write(&self, buf: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        let WriterState::Open { tx, pending, .. } = &mut *state else {
            return Err(io::Error::other(FsError::IllegalState(format!(
                "writer for {} is closed",
                self.target.display
            ))));
        };
        pending.extend_from_slice(buf);
        if pending.len() >= PIPE_CHUNK_SIZE {
            let chunk = pending.split().freeze();
            block_on(tx.send(Ok(chunk))).map_err(|_| self.broken_pipe())?;
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        let mut state = self.lock();
        if let WriterState::Open { tx, pending, .. } = &mut *state {
            if !pending.is_empty() {
                let chunk = pending.split().freeze();
                block_on(tx.send(Ok(chunk))).map_err(|_| self.broken_pipe())?;
            }
        }
        Ok(())
    }

    /// Close the pipe, wait for the upload and report its outcome. Later
    /// calls return `Ok`.
    fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.lock(), WriterState::Closed);
        let WriterState::Open { tx, done, pending } = previous else {
            return Ok(());
        };

        if !pending.is_empty() {
            // A failed send means the task already ended; its result says why.
            let _ = block_on(tx.send(Ok(pending.freeze())));
        }
        drop(tx);

        let result = block_on(done).unwrap_or_else(|_| {
            Err(self.target.failed("upload task terminated without reporting a result"))
        });

        if let (Some(fs), Some(id)) = (self.fs.upgrade(), self.resource_id.get()) {
            fs.deregister(*id);
        }

        if result.is_ok() && self.delete_on_close {
            self.delete_target()?;
        }
        result
    }

    /// Fail the upload on purpose so nothing is written, then close.
    fn abort(&self) {
        {
            let mut state = self.lock();
            if let WriterState::Open { tx, pending, .. } = &mut *state {
                pending.clear();
                let aborted = io::Error::other(format!("write to {} was aborted", self.target.display));
                let _ = block_on(tx.send(Err(aborted)));
            }
        }
        if let Err(e) = self.close() {
            debug!("Aborted upload: {}", e);
        }
    }

    fn delete_target(&self) -> Result<()> {
        let client = Arc::clone(&self.client);
        let (bucket, key) = (self.target.bucket.clone(), self.target.key.clone());
        debug!("Deleting {} on close", self.target.display);
        self.pool
            .run(async move { client.delete_object(&bucket, &key).await })?
            .map_err(|e| FsError::from_client(e, &self.target.display))
    }
}

impl Resource for WriterShared {
    fn describe(&self) -> String {
        format!("writer for {}", self.target.display)
    }

    fn close_resource(&self) -> Result<()> {
        self.close()
    }
}

/// Blocking writer for one object. Bytes become visible only after a
/// successful [`close`](Self::close).
pub struct ObjectWriter {
    shared: Arc<WriterShared>,
}

impl fmt::Debug for ObjectWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectWriter").field("target", &self.shared.target.display).finish()
    }
}

impl ObjectWriter {
    /// Start the upload task for `path` and register the writer with its
    /// file system. Existence checks are the caller's job.
    pub(crate) fn open(path: &S3Path, options: &WriteOptions) -> Result<Self> {
        let real = path.to_real_path()?;
        let fs = Arc::clone(real.file_system());
        fs.ensure_open()?;
        let shared = Self::start(&fs, &real, options);
        Self::attach(&fs, shared)
    }

    fn start(fs: &Arc<S3FileSystem>, real: &S3Path, options: &WriteOptions) -> Arc<WriterShared> {
        let target = UploadTarget {
            bucket: fs.bucket_name().to_string(),
            key: real.key(),
            display: real.to_string(),
            content_type: options.content_type.clone(),
            if_none_match: options.existence == Existence::MustNotExist,
        };
        let spill = SpillSettings {
            memory_ceiling: fs.config().upload_memory_ceiling,
            dir: fs.config().spill_dir.clone(),
        };

        let (tx, rx) = mpsc::channel(fs.config().pipe_capacity.max(1));
        let (done_tx, done_rx) = oneshot::channel();
        let client = Arc::clone(fs.client());
        let task_target = target.clone();
        let content_length = options.content_length;
        fs.pool().spawn(async move {
            let result = run_upload(client, task_target, content_length, spill, rx).await;
            let _ = done_tx.send(result);
        });

        Arc::new(WriterShared {
            target,
            fs: Arc::downgrade(fs),
            client: Arc::clone(fs.client()),
            pool: Arc::clone(fs.pool()),
            resource_id: OnceLock::new(),
            delete_on_close: options.delete_on_close,
            state: Mutex::new(WriterState::Open { tx, done: done_rx, pending: BytesMut::new() }),
        })
    }

    /// Register with the file system. If it closed in the meantime the
    /// upload is aborted so nothing reaches the bucket.
    fn attach(fs: &S3FileSystem, shared: Arc<WriterShared>) -> Result<Self> {
        match fs.register(shared.clone()) {
            Ok(id) => {
                let _ = shared.resource_id.set(id);
                Ok(Self { shared })
            }
            Err(e) => {
                shared.abort();
                Err(e)
            }
        }
    }

    /// Flush, wait for the upload and report its outcome.
    pub fn close(&mut self) -> Result<()> {
        self.shared.close()
    }

    /// Close without writing the object. Whatever was written is discarded.
    pub fn abort(&mut self) {
        self.shared.abort()
    }
}

impl Write for ObjectWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.shared.write(buf)?;
        Ok(buf.len())
    }

    /// Hands buffered bytes to the upload task. Not a durability point.
    fn flush(&mut self) -> io::Result<()> {
        self.shared.flush()
    }
}

impl Drop for ObjectWriter {
    fn drop(&mut self) {
        if let Err(e) = self.shared.close() {
            warn!("Writer for {} dropped without close; upload failed: {}", self.shared.target.display, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::tests::test_filesystem_on;
    use crate::memory_client::MemoryObjectClient;
    use futures::TryStreamExt;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream::iter(parts.iter().map(|p| Ok(Bytes::from_static(p))).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn length_check_passes_exact_streams() {
        let out: Vec<Bytes> = length_checked(chunks(&[b"Hello, ", b"world!"]), 13)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(out.concat(), b"Hello, world!");
    }

    #[tokio::test]
    async fn length_check_rejects_short_and_long_streams() {
        let short: io::Result<Vec<Bytes>> = length_checked(chunks(&[b"abc"]), 4).try_collect().await;
        assert_eq!(short.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);

        let long: io::Result<Vec<Bytes>> = length_checked(chunks(&[b"abc", b"de"]), 4).try_collect().await;
        assert_eq!(long.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn closed_file_system_at_registration_writes_nothing() {
        let client = Arc::new(MemoryObjectClient::new());
        client.create_bucket("example", "us-east-1");
        let fs = test_filesystem_on(client.clone(), "example");
        let path = fs.get_path("/late.txt", &[]).unwrap();

        // The file system closes between starting the upload and registration.
        let options = WriteOptions {
            content_length: None,
            content_type: None,
            existence: Existence::Any,
            delete_on_close: false,
        };
        let shared = ObjectWriter::start(&fs, &path, &options);
        shared.write(b"never visible").unwrap();
        shared.flush().unwrap();
        fs.close().unwrap();

        let err = ObjectWriter::attach(&fs, shared).unwrap_err();
        assert!(matches!(err, FsError::ClosedFilesystem(_)), "got {err}");
        assert!(client.get_bytes("example", "late.txt").is_none());
    }
}
