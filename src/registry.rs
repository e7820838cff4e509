// src/registry.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Cache of live file systems, keyed by location identity.
//!
//! The first reference to a bucket probes its region, builds a client bound
//! to it and caches the resulting [`S3FileSystem`]. Entries live until
//! [`invalidate`](FilesystemRegistry::invalidate) or until the file system is
//! closed, in which case the next lookup builds a fresh one.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::config::FsConfig;
use crate::error::{FsError, Result};
use crate::filesystem::S3FileSystem;
use crate::location::Location;
use crate::object_client::{ClientError, ClientFactory, ClientTarget, ObjectClient};
use crate::path::S3Path;
use crate::runtime::WorkerPool;
use crate::s3_client::AwsClientFactory;

pub struct FilesystemRegistry {
    config: Arc<FsConfig>,
    factory: Arc<dyn ClientFactory>,
    pool: Arc<WorkerPool>,
    cache: Mutex<HashMap<String, Arc<S3FileSystem>>>,
}

impl fmt::Debug for FilesystemRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilesystemRegistry")
            .field("factory", &self.factory)
            .field("cached", &self.cache().len())
            .finish_non_exhaustive()
    }
}

impl FilesystemRegistry {
    /// Registry backed by the AWS SDK.
    pub fn new(config: FsConfig) -> Result<Self> {
        let config = Arc::new(config);
        let factory = Arc::new(AwsClientFactory::new(Arc::clone(&config)));
        Self::build(config, factory)
    }

    /// Registry whose clients come from `factory`.
    pub fn with_factory(config: FsConfig, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        Self::build(Arc::new(config), factory)
    }

    fn build(config: Arc<FsConfig>, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        let pool = Arc::new(WorkerPool::start(config.worker_threads)?);
        Ok(Self { config, factory, pool, cache: Mutex::new(HashMap::new()) })
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, Arc<S3FileSystem>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The cached file system for `uri`, creating it on first use.
    pub fn get_or_create(&self, uri: &str) -> Result<Arc<S3FileSystem>> {
        let location = Location::parse(uri)?;
        self.get_or_create_for(&location)
    }

    pub fn get_or_create_for(&self, location: &Location) -> Result<Arc<S3FileSystem>> {
        let identity = location.identity();
        if let Some(fs) = self.cache().get(&identity) {
            if fs.is_open() {
                return Ok(Arc::clone(fs));
            }
            debug!("Replacing closed file system {}", identity);
        }

        // Created without the lock: region lookup is a network round trip.
        let created = self.create(location)?;
        let mut cache = self.cache();
        match cache.get(&identity) {
            Some(existing) if existing.is_open() => {
                debug!("File system {} was created concurrently; keeping the cached one", identity);
                Ok(Arc::clone(existing))
            }
            _ => {
                cache.insert(identity, Arc::clone(&created));
                Ok(created)
            }
        }
    }

    /// The cached file system for `uri`; `NotFound` if there is none.
    pub fn get(&self, uri: &str) -> Result<Arc<S3FileSystem>> {
        let location = Location::parse(uri)?;
        self.cache()
            .get(&location.identity())
            .filter(|fs| fs.is_open())
            .cloned()
            .ok_or_else(|| FsError::NotFound(format!("file system for {uri}")))
    }

    /// Absolute path for `uri`, creating its file system if needed.
    pub fn get_path(&self, uri: &str) -> Result<S3Path> {
        let location = Location::parse(uri)?;
        let fs = self.get_or_create_for(&location)?;
        Ok(S3Path::from_key(fs, location.key()))
    }

    /// Drop every cached file system. Handles already given out keep working.
    pub fn invalidate(&self) {
        let dropped = self.cache().drain().count();
        info!("Invalidated {} cached file systems", dropped);
    }

    fn create(&self, location: &Location) -> Result<Arc<S3FileSystem>> {
        let authority = location.authority().cloned();
        let probe_target =
            ClientTarget { region: self.config.default_region.clone(), authority: authority.clone() };
        let probe = self.client_for(&probe_target)?;

        let bucket = location.bucket().to_string();
        let probe_client = Arc::clone(&probe);
        let probed = self
            .pool
            .run(async move { probe_client.head_bucket(&bucket).await })?;

        let region = match probed {
            Ok(info) => info.region,
            Err(e @ (ClientError::NoSuchBucket(_) | ClientError::AccessDenied(_))) => {
                return Err(FsError::from_client(e, location.bucket()));
            }
            Err(e) => {
                warn!("Could not determine region of bucket {}: {}", location.bucket(), e);
                None
            }
        };

        let client = match region {
            Some(region) if region != probe_target.region => {
                debug!("Bucket {} is in region {}", location.bucket(), region);
                self.client_for(&ClientTarget { region, authority })?
            }
            _ => probe,
        };

        Ok(S3FileSystem::new(location, client, Arc::clone(&self.pool), Arc::clone(&self.config)))
    }

    fn client_for(&self, target: &ClientTarget) -> Result<Arc<dyn ObjectClient>> {
        let factory = Arc::clone(&self.factory);
        let target = target.clone();
        Ok(self
            .pool
            .run(async move { factory.create_client(&target).await })??)
    }
}
