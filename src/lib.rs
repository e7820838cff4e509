// src/lib.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Crate root: an S3 bucket exposed as a hierarchical file system.

// ===== Core Public API =====

pub mod attributes;
pub mod directory;
pub mod error;
pub mod filesystem;
pub mod location;
pub mod options;
pub mod path;
pub mod provider;
pub mod reader;
pub mod registry;
pub mod upload;

// ===== Backends =====
pub mod memory_client;
pub mod object_client;
pub mod s3_client;

// ===== Ambient =====
pub mod config;
pub mod constants;
pub mod runtime;

pub use attributes::{AttributeValue, BasicAttributes};
pub use config::FsConfig;
pub use directory::{DirectoryStream, EntryFilter, EntryKind};
pub use error::{FsError, Result};
pub use filesystem::S3FileSystem;
pub use location::{Authority, Credentials, Location};
pub use options::{AccessMode, CopyOption, OpenOption};
pub use path::S3Path;
pub use provider::S3FileSystemProvider;
pub use reader::ObjectReader;
pub use registry::FilesystemRegistry;
pub use upload::ObjectWriter;
