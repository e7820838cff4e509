// src/object_client.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Pluggable object-store client: the only surface through which the file
// system talks to a backend.
// - AwsObjectClient (s3_client.rs) drives the AWS SDK
// - MemoryObjectClient (memory_client.rs) keeps objects in process, for tests
//   and embedding

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use thiserror::Error;
use tokio_util::io::ReaderStream;

use crate::constants::SPILL_READ_CHUNK_SIZE;
use crate::location::Authority;

/// A pull-style stream of body chunks.
pub type ByteChunkStream = BoxStream<'static, io::Result<Bytes>>;

/// Backend-specific failures, before translation into [`crate::FsError`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    #[error("no such key: {bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("request body supplier was invoked more than once")]
    BodyConsumed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Default)]
pub struct BucketInfo {
    pub region: Option<String>,
}

/// HEAD-style object metadata. Every field is optional because backends
/// are not obliged to send any of them; attribute projection decides what
/// is required.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_length: Option<u64>,
    pub e_tag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
}

pub struct ObjectBody {
    pub metadata: ObjectMetadata,
    pub stream: ByteChunkStream,
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody").field("metadata", &self.metadata).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ListRequest {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: Option<i32>,
    pub continuation_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub e_tag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub common_prefixes: Vec<String>,
    pub contents: Vec<ObjectSummary>,
    pub next_continuation_token: Option<String>,
}

impl ListPage {
    pub fn is_empty(&self) -> bool {
        self.common_prefixes.is_empty() && self.contents.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PutRequest {
    pub bucket: String,
    pub key: String,
    /// Ask the backend to refuse the put if the key already exists.
    pub if_none_match: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PutOutput {
    pub e_tag: Option<String>,
}

/// Where upload bytes come from.
pub enum BodySource {
    Bytes(Bytes),
    /// A spill file; the uploader keeps it alive until the put returns.
    File(PathBuf),
    Stream(ByteChunkStream),
}

impl BodySource {
    pub fn into_stream(self) -> ByteChunkStream {
        match self {
            BodySource::Bytes(b) if b.is_empty() => stream::empty().boxed(),
            BodySource::Bytes(b) => stream::once(async move { Ok(b) }).boxed(),
            BodySource::File(path) => stream::once(tokio::fs::File::open(path))
                .map_ok(|f| ReaderStream::with_capacity(f, SPILL_READ_CHUNK_SIZE))
                .try_flatten()
                .boxed(),
            BodySource::Stream(s) => s,
        }
    }
}

impl fmt::Debug for BodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodySource::Bytes(b) => write!(f, "Bytes({})", b.len()),
            BodySource::File(p) => write!(f, "File({})", p.display()),
            BodySource::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Upload body: declared length, optional content type and a one-shot
/// byte supplier.
///
/// [`open`](Self::open) hands out the source exactly once. A second call
/// (for example from a retry layer) fails with
/// [`ClientError::BodyConsumed`] instead of re-reading a partially
/// consumed buffer.
pub struct RequestBody {
    content_length: u64,
    content_type: Option<String>,
    source: Mutex<Option<BodySource>>,
}

impl RequestBody {
    pub fn new(content_length: u64, content_type: Option<String>, source: BodySource) -> Self {
        Self { content_length, content_type, source: Mutex::new(Some(source)) }
    }

    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new(), None)
    }

    pub fn from_bytes(data: Bytes, content_type: Option<String>) -> Self {
        Self::new(data.len() as u64, content_type, BodySource::Bytes(data))
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn open(&self) -> ClientResult<BodySource> {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ClientError::BodyConsumed)
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody")
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// The backend operations the file system consumes.
///
/// Implementations must be safe for concurrent use by many in-flight
/// operations.
#[async_trait]
pub trait ObjectClient: Send + Sync + fmt::Debug {
    async fn head_bucket(&self, bucket: &str) -> ClientResult<BucketInfo>;

    async fn head_object(&self, bucket: &str, key: &str) -> ClientResult<ObjectMetadata>;

    async fn get_object(&self, bucket: &str, key: &str) -> ClientResult<ObjectBody>;

    async fn put_object(&self, request: PutRequest, body: RequestBody) -> ClientResult<PutOutput>;

    /// One page of a prefix (+ optional delimiter) listing.
    async fn list_objects(&self, request: ListRequest) -> ClientResult<ListPage>;

    /// Deleting a missing key is not an error.
    async fn delete_object(&self, bucket: &str, key: &str) -> ClientResult<()>;
}

/// Region + optional explicit endpoint a client should be bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTarget {
    pub region: String,
    pub authority: Option<Authority>,
}

/// Builds backend clients for the registry. Injected through the registry
/// constructor, so tests can swap in an in-memory backend.
#[async_trait]
pub trait ClientFactory: Send + Sync + fmt::Debug {
    async fn create_client(&self, target: &ClientTarget) -> anyhow::Result<Arc<dyn ObjectClient>>;
}
