// src/runtime.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Shared worker pool: a multi-thread Tokio runtime parked on its own OS
//! thread, plus a blocking bridge so synchronous callers can drive async
//! backend calls.
//!
//! One pool is owned by each registry and shared by every file system it
//! creates. Upload and read-ahead tasks are spawned here.

use std::future::Future;
use std::sync::{Mutex, PoisonError, mpsc};
use std::thread;

use anyhow::Context;
use tokio::runtime::{Builder as TokioBuilder, Handle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{FsError, Result};

pub struct WorkerPool {
    handle: Handle,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Start a runtime with `threads` workers on a dedicated thread and
    /// return once its handle is available.
    pub fn start(threads: usize) -> anyhow::Result<Self> {
        let threads = threads.max(1);
        let (tx, rx) = mpsc::sync_channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        thread::Builder::new()
            .name("s3fs-rt".to_string())
            .spawn(move || {
                debug!("Creating Tokio runtime with {} worker threads", threads);
                let rt = match TokioBuilder::new_multi_thread()
                    .enable_io()
                    .enable_time()
                    .worker_threads(threads)
                    .thread_name("s3fs-rt-worker")
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };

                // Send a Handle clone back to the creator, then park until shutdown.
                let _ = tx.send(Ok(rt.handle().clone()));
                rt.block_on(async {
                    let _ = shutdown_rx.await;
                });
                debug!("s3fs runtime shutting down");
            })
            .context("failed to spawn s3fs runtime thread")?;

        let handle = rx
            .recv()
            .context("runtime thread exited before reporting its handle")?
            .context("failed to build tokio runtime")?;

        Ok(Self { handle, shutdown: Mutex::new(Some(shutdown_tx)) })
    }

    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(fut)
    }

    /// Run `fut` on the pool and block the **current** thread until it
    /// completes. Safe to call from inside another runtime's context.
    pub fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.handle.spawn(async move {
            let _ = tx.send(fut.await);
        });
        rx.recv()
            .map_err(|_| FsError::IllegalState("worker task terminated unexpectedly".to_string()))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // The runtime is dropped on its own thread, never inside an async context.
        let sender = self
            .shutdown
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_blocks_until_complete() {
        let pool = WorkerPool::start(2).unwrap();
        let v = pool.run(async { 40 + 2 }).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn panicking_task_reports_illegal_state() {
        let pool = WorkerPool::start(1).unwrap();
        let r: Result<()> = pool.run(async { panic!("boom") });
        assert!(matches!(r, Err(FsError::IllegalState(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_works_inside_foreign_runtime() {
        let pool = WorkerPool::start(1).unwrap();
        let v = tokio::task::block_in_place(|| pool.run(async { "ok" })).unwrap();
        assert_eq!(v, "ok");
    }
}
