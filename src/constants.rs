// src/constants.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Centralized constants for s3fs-lite to avoid hardcoded values throughout the codebase

use std::time::Duration;

/// Path separator used for keys and path strings
pub const SEPARATOR: &str = "/";

/// Separator as a char, for splitting
pub const SEPARATOR_CHAR: char = '/';

/// Short URI scheme: `s3://bucket/key`
pub const S3_SCHEME: &str = "s3";

/// Extended URI scheme with explicit authority: `s3x://[ak:secret@]host[:port]/bucket/key`
pub const S3X_SCHEME: &str = "s3x";

/// Region used when nothing else resolves one
pub const DEFAULT_REGION: &str = "us-east-1";

/// Protocol used to reach `s3x` endpoints unless configured otherwise
pub const DEFAULT_ENDPOINT_PROTOCOL: &str = "https";

/// In-memory ceiling for unknown-length uploads before spilling to disk (5 MiB)
pub const DEFAULT_UPLOAD_MEMORY_CEILING: usize = 5 * 1024 * 1024;

/// Number of chunks the caller may have in flight ahead of the upload task
pub const DEFAULT_PIPE_CAPACITY: usize = 16;

/// Writer-side coalescing: small writes are gathered into chunks of this size
pub const PIPE_CHUNK_SIZE: usize = 64 * 1024;

/// Number of chunks buffered between a GET body and the blocking reader
pub const DEFAULT_READ_AHEAD_CHUNKS: usize = 8;

/// Chunk size used when streaming a spill file back out
pub const SPILL_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Prefix/suffix for spill files, e.g. `s3.XXXXXX.buf`
pub const SPILL_FILE_PREFIX: &str = "s3.";
pub const SPILL_FILE_SUFFIX: &str = ".buf";

/// Lower bound on worker threads for the shared upload/IO runtime
pub const MIN_WORKER_THREADS: usize = 4;

/// Upper bound on worker threads, to avoid thread explosion on large hosts
pub const MAX_WORKER_THREADS: usize = 32;

/// Default per-operation timeout for backend calls
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Default connect timeout for backend calls
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Name of the only attribute view this file system supports
pub const BASIC_ATTRIBUTE_VIEW: &str = "basic";
