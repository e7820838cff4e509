// src/reader.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Blocking pass-through reader over a GET body.
//!
//! The GET is issued when the reader opens, so a missing object fails there.
//! A pump task on the worker pool moves body chunks into a small bounded
//! channel that [`ObjectReader`] drains.

use std::fmt;
use std::io::{self, Read};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use bytes::{Buf, Bytes};
use futures::StreamExt;
use futures::executor::block_on;
use tokio::sync::mpsc;
use tracing::debug;

use crate::constants::DEFAULT_READ_AHEAD_CHUNKS;
use crate::error::{FsError, Result};
use crate::filesystem::{Resource, ResourceId, S3FileSystem};
use crate::object_client::{ObjectClient, ObjectMetadata};
use crate::options::ReadOptions;
use crate::path::S3Path;
use crate::runtime::WorkerPool;

enum ReaderState {
    Open { rx: mpsc::Receiver<io::Result<Bytes>>, current: Bytes },
    Closed,
}

struct ReaderShared {
    bucket: String,
    key: String,
    display: String,
    fs: Weak<S3FileSystem>,
    client: Arc<dyn ObjectClient>,
    pool: Arc<WorkerPool>,
    resource_id: OnceLock<ResourceId>,
    delete_on_close: bool,
    state: Mutex<ReaderState>,
}

impl ReaderShared {
    fn lock(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.lock();
        let ReaderState::Open { rx, current } = &mut *state else {
            return Err(io::Error::other(FsError::IllegalState(format!(
                "reader for {} is closed",
                self.display
            ))));
        };
        while !current.has_remaining() {
            match block_on(rx.recv()) {
                Some(Ok(chunk)) => *current = chunk,
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(current.remaining());
        current.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }

    fn close(&self) -> Result<()> {
        self.shut(self.delete_on_close)
    }

    /// Stop the pump and deregister; `delete` also removes the object.
    fn shut(&self, delete: bool) -> Result<()> {
        let previous = std::mem::replace(&mut *self.lock(), ReaderState::Closed);
        if matches!(previous, ReaderState::Closed) {
            return Ok(());
        }
        // Dropping the receiver stops the pump task.
        drop(previous);

        if let (Some(fs), Some(id)) = (self.fs.upgrade(), self.resource_id.get()) {
            fs.deregister(*id);
        }

        if delete {
            debug!("Deleting {} on close", self.display);
            let client = Arc::clone(&self.client);
            let (bucket, key) = (self.bucket.clone(), self.key.clone());
            self.pool
                .run(async move { client.delete_object(&bucket, &key).await })?
                .map_err(|e| FsError::from_client(e, &self.display))?;
        }
        Ok(())
    }
}

impl Resource for ReaderShared {
    fn describe(&self) -> String {
        format!("reader for {}", self.display)
    }

    fn close_resource(&self) -> Result<()> {
        self.close()
    }
}

pub struct ObjectReader {
    shared: Arc<ReaderShared>,
    metadata: ObjectMetadata,
}

impl fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectReader")
            .field("source", &self.shared.display)
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl ObjectReader {
    pub(crate) fn open(path: &S3Path, options: &ReadOptions) -> Result<Self> {
        let real = path.to_real_path()?;
        let fs = Arc::clone(real.file_system());
        let (shared, metadata) = Self::start(&fs, &real, options)?;
        Self::attach(&fs, shared, metadata)
    }

    /// Issue the GET and start pumping its body.
    fn start(
        fs: &Arc<S3FileSystem>,
        real: &S3Path,
        options: &ReadOptions,
    ) -> Result<(Arc<ReaderShared>, ObjectMetadata)> {
        let display = real.to_string();
        let (bucket, key) = (fs.bucket_name().to_string(), real.key());

        let (b, k) = (bucket.clone(), key.clone());
        let body = fs.call(&display, move |client| async move { client.get_object(&b, &k).await })?;

        let (tx, rx) = mpsc::channel(DEFAULT_READ_AHEAD_CHUNKS);
        let mut stream = body.stream;
        fs.pool().spawn(async move {
            while let Some(chunk) = stream.next().await {
                let stop = chunk.is_err();
                if tx.send(chunk).await.is_err() || stop {
                    break;
                }
            }
        });

        let shared = Arc::new(ReaderShared {
            bucket,
            key,
            display,
            fs: Arc::downgrade(fs),
            client: Arc::clone(fs.client()),
            pool: Arc::clone(fs.pool()),
            resource_id: OnceLock::new(),
            delete_on_close: options.delete_on_close,
            state: Mutex::new(ReaderState::Open { rx, current: Bytes::new() }),
        });
        Ok((shared, body.metadata))
    }

    /// Register with the file system. If it closed in the meantime the
    /// reader is shut without honouring delete-on-close.
    fn attach(fs: &S3FileSystem, shared: Arc<ReaderShared>, metadata: ObjectMetadata) -> Result<Self> {
        match fs.register(shared.clone()) {
            Ok(id) => {
                let _ = shared.resource_id.set(id);
                Ok(Self { shared, metadata })
            }
            Err(e) => {
                let _ = shared.shut(false);
                Err(e)
            }
        }
    }

    /// Metadata returned with the GET response.
    pub fn metadata(&self) -> &ObjectMetadata {
        &self.metadata
    }

    pub fn close(&mut self) -> Result<()> {
        self.shared.close()
    }
}

impl Read for ObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.shared.read(buf)
    }
}

impl Drop for ObjectReader {
    fn drop(&mut self) {
        if let Err(e) = self.shared.close() {
            debug!("Closing reader for {} on drop failed: {}", self.shared.display, e);
        }
    }
}
