// src/provider.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Path-level operations over S3 file systems.
//!
//! Every call is blocking from the caller's point of view. Paths carry their
//! file system, so most operations only need the path; URIs are resolved
//! through the provider's [`FilesystemRegistry`].

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::attributes::{AttributeValue, BasicAttributes, parse_attribute_names};
use crate::config::FsConfig;
use crate::constants::S3_SCHEME;
use crate::directory::{self, DirectoryStream, EntryFilter, EntryKind};
use crate::error::{FsError, Result};
use crate::filesystem::S3FileSystem;
use crate::object_client::{ClientFactory, ObjectMetadata, PutRequest, RequestBody};
use crate::options::{AccessMode, CopyOption, Existence, OpenOption, ReadOptions, WriteOptions};
use crate::path::S3Path;
use crate::reader::ObjectReader;
use crate::registry::FilesystemRegistry;
use crate::upload::ObjectWriter;

#[derive(Debug)]
pub struct S3FileSystemProvider {
    registry: FilesystemRegistry,
}

impl S3FileSystemProvider {
    /// Provider backed by the AWS SDK, configured by `config`.
    pub fn new(config: FsConfig) -> Result<Self> {
        Ok(Self { registry: FilesystemRegistry::new(config)? })
    }

    pub fn with_factory(config: FsConfig, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        Ok(Self { registry: FilesystemRegistry::with_factory(config, factory)? })
    }

    pub fn from_registry(registry: FilesystemRegistry) -> Self {
        Self { registry }
    }

    pub fn scheme(&self) -> &'static str {
        S3_SCHEME
    }

    pub fn registry(&self) -> &FilesystemRegistry {
        &self.registry
    }

    /// Create (or reuse) the file system for `uri`.
    pub fn new_file_system(&self, uri: &str) -> Result<Arc<S3FileSystem>> {
        self.registry.get_or_create(uri)
    }

    /// The existing file system for `uri`; `NotFound` if none was created.
    pub fn get_file_system(&self, uri: &str) -> Result<Arc<S3FileSystem>> {
        self.registry.get(uri)
    }

    pub fn get_path(&self, uri: &str) -> Result<S3Path> {
        self.registry.get_path(uri)
    }

    pub fn exists(&self, path: &S3Path) -> Result<EntryKind> {
        directory::exists(path)
    }

    /// Check that `path` exists and is readable.
    ///
    /// WRITE and EXECUTE cannot be checked against the backend; they are
    /// logged and otherwise ignored.
    pub fn check_access(&self, path: &S3Path, modes: &[AccessMode]) -> Result<()> {
        for mode in modes {
            if matches!(mode, AccessMode::Write | AccessMode::Execute) {
                warn!("check_access: access mode {:?} is not checked for {}", mode, path);
            }
        }
        let real = path.to_real_path()?;
        let fs = real.file_system();

        if real.is_root() {
            let bucket = fs.bucket_name().to_string();
            return fs
                .call(&real.to_string(), move |client| async move {
                    client.head_bucket(&bucket).await
                })
                .map(|_| ());
        }
        match directory::exists(&real)? {
            EntryKind::Absent => Err(FsError::NotFound(real.to_string())),
            EntryKind::File | EntryKind::Directory => Ok(()),
        }
    }

    /// HEAD the exact key of `path`; `None` when it does not exist.
    fn head(&self, path: &S3Path) -> Result<Option<ObjectMetadata>> {
        let fs = path.file_system();
        let (bucket, key) = (fs.bucket_name().to_string(), path.key());
        let head = fs.call(&path.to_string(), move |client| async move {
            client.head_object(&bucket, &key).await
        });
        match head {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Copy by reading `source` and writing `target`.
    ///
    /// Copying a file onto itself does nothing. A directory `target`
    /// receives the source's file name. An existing target is replaced only
    /// with [`CopyOption::ReplaceExisting`].
    pub fn copy(&self, source: &S3Path, target: &S3Path, options: &[CopyOption]) -> Result<()> {
        self.copy_resolved(source, target, options).map(|_| ())
    }

    /// Returns the real target path, or `None` when nothing was copied.
    fn copy_resolved(
        &self,
        source: &S3Path,
        target: &S3Path,
        options: &[CopyOption],
    ) -> Result<Option<S3Path>> {
        let source = source.to_real_path()?;
        let mut target = target.to_real_path()?;
        if source == target {
            return Ok(None);
        }
        if source.is_directory() {
            return Err(FsError::InvalidArgument(format!("cannot copy directory {source}")));
        }
        if target.is_directory() {
            if let Some(name) = source.file_name() {
                target = target.resolve(&name);
            }
            if source == target {
                return Ok(None);
            }
        }

        if self.head(&target)?.is_some() && !options.contains(&CopyOption::ReplaceExisting) {
            return Err(FsError::AlreadyExists(target.to_string()));
        }

        let mut reader = ObjectReader::open(&source, &ReadOptions::default())?;
        let metadata = reader.metadata().clone();
        let write_options = WriteOptions {
            content_length: metadata.content_length,
            content_type: metadata.content_type,
            existence: Existence::Any,
            delete_on_close: false,
        };
        let mut writer = ObjectWriter::open(&target, &write_options)?;

        debug!("Copying {} to {}", source, target);
        if let Err(e) = io::copy(&mut reader, &mut writer) {
            writer.abort();
            return Err(e.into());
        }
        writer.close()?;
        reader.close()?;
        Ok(Some(target))
    }

    /// Copy, then delete the source. Not atomic: if the delete fails both
    /// objects remain and [`FsError::PartialMove`] is returned.
    pub fn move_path(&self, source: &S3Path, target: &S3Path, options: &[CopyOption]) -> Result<()> {
        if options.contains(&CopyOption::AtomicMove) {
            return Err(FsError::UnsupportedOperation("atomic move".into()));
        }
        let Some(moved_to) = self.copy_resolved(source, target, options)? else {
            return Ok(());
        };
        self.delete(source).map_err(|cause| FsError::PartialMove {
            source_path: source.to_string(),
            target_path: moved_to.to_string(),
            cause: Box::new(cause),
        })
    }

    /// Delete the object at `path`. A missing key is not an error, and a
    /// directory marker is removed without checking for children.
    pub fn delete(&self, path: &S3Path) -> Result<()> {
        let real = path.to_real_path()?;
        if real.is_root() {
            return Err(FsError::InvalidArgument("cannot delete the root directory".into()));
        }
        let fs = real.file_system();
        let (bucket, key) = (fs.bucket_name().to_string(), real.key());
        fs.call(&real.to_string(), move |client| async move {
            client.delete_object(&bucket, &key).await
        })
    }

    /// Write a zero-length `dir/` marker object.
    pub fn create_directory(&self, path: &S3Path) -> Result<()> {
        let real = path.to_real_path()?;
        if real.is_root() {
            return Err(FsError::AlreadyExists(real.to_string()));
        }
        let fs = real.file_system();
        let request = PutRequest {
            bucket: fs.bucket_name().to_string(),
            key: real.directory_prefix(),
            if_none_match: false,
        };
        fs.call(&real.to_string(), move |client| async move {
            client.put_object(request, RequestBody::empty()).await
        })
        .map(|_| ())
    }

    pub fn open_read(&self, path: &S3Path, options: &[OpenOption]) -> Result<ObjectReader> {
        let options = ReadOptions::from_options(options)?;
        ObjectReader::open(path, &options)
    }

    /// Open a writer. `CreateNew` and the must-exist mode are checked with a
    /// HEAD first; `CreateNew` is also enforced by a conditional put.
    pub fn open_write(&self, path: &S3Path, options: &[OpenOption]) -> Result<ObjectWriter> {
        let options = WriteOptions::from_options(options)?;
        let real = path.to_real_path()?;
        if real.is_directory() {
            return Err(FsError::InvalidArgument(format!("{real} is a directory")));
        }
        match options.existence {
            Existence::Any => {}
            Existence::MustNotExist => {
                if self.head(&real)?.is_some() {
                    return Err(FsError::AlreadyExists(real.to_string()));
                }
            }
            Existence::MustExist => {
                if self.head(&real)?.is_none() {
                    return Err(FsError::NotFound(real.to_string()));
                }
            }
        }
        ObjectWriter::open(&real, &options)
    }

    pub fn new_directory_stream(&self, dir: &S3Path, filter: EntryFilter) -> Result<DirectoryStream> {
        DirectoryStream::open(dir, filter)
    }

    /// List every immediate child of `dir`.
    pub fn list(&self, dir: &S3Path) -> Result<DirectoryStream> {
        DirectoryStream::open(dir, directory::accept_all())
    }

    /// Directory paths get the fixed directory record without a HEAD. A
    /// file path whose key is missing but which has children is a directory.
    pub fn read_attributes(&self, path: &S3Path) -> Result<BasicAttributes> {
        let real = path.to_real_path()?;
        if real.is_directory() {
            real.file_system().ensure_open()?;
            return Ok(BasicAttributes::directory());
        }
        match self.head(&real)? {
            Some(metadata) => BasicAttributes::from_metadata(&real.to_string(), &metadata),
            None => match directory::exists(&real)? {
                EntryKind::Directory => Ok(BasicAttributes::directory()),
                _ => Err(FsError::NotFound(real.to_string())),
            },
        }
    }

    /// Attributes named in `names` as a map; empty for directories.
    pub fn read_attribute_map(
        &self,
        path: &S3Path,
        names: &str,
    ) -> Result<BTreeMap<String, AttributeValue>> {
        if parse_attribute_names(names)?.is_empty() {
            return Ok(BTreeMap::new());
        }
        let attrs = self.read_attributes(path)?;
        if attrs.is_directory() {
            return Ok(BTreeMap::new());
        }
        attrs.to_map(names)
    }

    /// Attributes change only by replacing the object.
    pub fn set_attribute(&self, _path: &S3Path, name: &str, _value: AttributeValue) -> Result<()> {
        Err(FsError::UnsupportedOperation(format!("setting attribute '{name}'")))
    }

    pub fn is_same_file(&self, a: &S3Path, b: &S3Path) -> Result<bool> {
        Ok(a.to_real_path()? == b.to_real_path()?)
    }

    pub fn is_hidden(&self, _path: &S3Path) -> Result<bool> {
        Ok(false)
    }
}
