// src/filesystem.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! One bucket (on one endpoint) viewed as a file system.
//!
//! An [`S3FileSystem`] owns its backend client and the set of readers and
//! writers currently open against it. Closing it closes every one of them.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::config::FsConfig;
use crate::constants::{BASIC_ATTRIBUTE_VIEW, SEPARATOR};
use crate::error::{FsError, Result};
use crate::location::{Authority, Location};
use crate::object_client::{ClientResult, ObjectClient};
use crate::path::S3Path;
use crate::runtime::WorkerPool;

pub(crate) type ResourceId = u64;

/// An open handle that the owning file system can close on its own.
pub(crate) trait Resource: Send + Sync {
    fn describe(&self) -> String;

    /// Close the handle. Must tolerate being called more than once.
    fn close_resource(&self) -> Result<()>;
}

pub struct S3FileSystem {
    identity: String,
    bucket: String,
    authority: Option<Authority>,
    client: Arc<dyn ObjectClient>,
    pool: Arc<WorkerPool>,
    config: Arc<FsConfig>,
    open: AtomicBool,
    resources: Mutex<HashMap<ResourceId, Arc<dyn Resource>>>,
    next_resource: AtomicU64,
}

impl fmt::Debug for S3FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3FileSystem")
            .field("identity", &self.identity)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl S3FileSystem {
    pub(crate) fn new(
        location: &Location,
        client: Arc<dyn ObjectClient>,
        pool: Arc<WorkerPool>,
        config: Arc<FsConfig>,
    ) -> Arc<Self> {
        debug!("Creating file system for {}", location.identity());
        Arc::new(Self {
            identity: location.identity(),
            bucket: location.bucket().to_string(),
            authority: location.authority().cloned(),
            client,
            pool,
            config,
            open: AtomicBool::new(true),
            resources: Mutex::new(HashMap::new()),
            next_resource: AtomicU64::new(1),
        })
    }

    /// Cache key shared by every location on the same backend + bucket.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    pub fn authority(&self) -> Option<&Authority> {
        self.authority.as_ref()
    }

    pub(crate) fn client(&self) -> &Arc<dyn ObjectClient> {
        &self.client
    }

    pub(crate) fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub(crate) fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(FsError::ClosedFilesystem(self.identity.clone()))
        }
    }

    pub fn separator(&self) -> Result<&'static str> {
        self.ensure_open()?;
        Ok(SEPARATOR)
    }

    pub fn is_read_only(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(false)
    }

    pub fn supported_attribute_views(&self) -> Result<Vec<&'static str>> {
        self.ensure_open()?;
        Ok(vec![BASIC_ATTRIBUTE_VIEW])
    }

    pub fn root(self: &Arc<Self>) -> Result<S3Path> {
        self.ensure_open()?;
        Ok(S3Path::root_of(Arc::clone(self)))
    }

    pub fn root_directories(self: &Arc<Self>) -> Result<Vec<S3Path>> {
        Ok(vec![self.root()?])
    }

    /// Join `first` and `more` with the separator and parse the result.
    pub fn get_path(self: &Arc<Self>, first: &str, more: &[&str]) -> Result<S3Path> {
        self.ensure_open()?;
        let mut joined = first.to_string();
        for part in more.iter().filter(|p| !p.is_empty()) {
            if !joined.is_empty() && !joined.ends_with(SEPARATOR) {
                joined.push_str(SEPARATOR);
            }
            joined.push_str(part);
        }
        Ok(S3Path::parse(Arc::clone(self), &joined))
    }

    /// Run one backend call on the worker pool, blocking the caller, and
    /// translate its error against `what` (the path or bucket concerned).
    pub(crate) fn call<F, Fut, T>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn ObjectClient>) -> Fut,
        Fut: Future<Output = ClientResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_open()?;
        self.pool
            .run(op(Arc::clone(&self.client)))?
            .map_err(|e| FsError::from_client(e, what))
    }

    fn resources(&self) -> MutexGuard<'_, HashMap<ResourceId, Arc<dyn Resource>>> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, resource: Arc<dyn Resource>) -> Result<ResourceId> {
        self.ensure_open()?;
        let id = self.next_resource.fetch_add(1, Ordering::Relaxed);
        self.resources().insert(id, resource);
        Ok(id)
    }

    pub(crate) fn deregister(&self, id: ResourceId) {
        self.resources().remove(&id);
    }

    pub fn open_resource_count(&self) -> usize {
        self.resources().len()
    }

    /// Close every open reader and writer, then mark this file system closed.
    ///
    /// All resources are attempted; the first failure is returned once
    /// they have been. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let resources: Vec<Arc<dyn Resource>> = self.resources().drain().map(|(_, r)| r).collect();
        debug!("Closing file system {} with {} open resources", self.identity, resources.len());

        let mut first_error = None;
        for resource in resources {
            if let Err(e) = resource.close_resource() {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!("Additional failure closing {}: {}", resource.describe(), e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
