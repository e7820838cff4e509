// src/config.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Runtime parameters for the registry, its clients and its upload workers.

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_ENDPOINT_PROTOCOL, DEFAULT_OPERATION_TIMEOUT,
    DEFAULT_PIPE_CAPACITY, DEFAULT_REGION, DEFAULT_UPLOAD_MEMORY_CEILING, MAX_WORKER_THREADS,
    MIN_WORKER_THREADS,
};

/// Explicit configuration handed to [`crate::registry::FilesystemRegistry`].
///
/// There is no process-wide default client; every registry owns its config.
#[derive(Debug, Clone)]
pub struct FsConfig {
    /// Region for the default client and the bucket-region probe.
    pub default_region: String,
    /// Optional endpoint override for `s3://` locations (MinIO, LocalStack, ...).
    pub endpoint_url: Option<String>,
    /// `http` or `https`, used to build `s3x://` endpoints.
    pub endpoint_protocol: String,
    pub force_path_style: bool,
    /// PEM bundle used as the only trust root, when set.
    pub ca_bundle_path: Option<PathBuf>,
    pub worker_threads: usize,
    /// Unknown-length uploads larger than this spill to a temp file.
    pub upload_memory_ceiling: usize,
    /// Chunks in flight between a writer and its upload task.
    pub pipe_capacity: usize,
    /// max-keys for listing pages; `None` lets the backend decide.
    pub list_page_size: Option<i32>,
    /// Where spill files go; `None` means the system temp dir.
    pub spill_dir: Option<PathBuf>,
    pub operation_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            default_region: DEFAULT_REGION.to_string(),
            endpoint_url: None,
            endpoint_protocol: DEFAULT_ENDPOINT_PROTOCOL.to_string(),
            force_path_style: false,
            ca_bundle_path: None,
            worker_threads: default_worker_threads(),
            upload_memory_ceiling: DEFAULT_UPLOAD_MEMORY_CEILING,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            list_page_size: None,
            spill_dir: None,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl FsConfig {
    /// Load `.env` (if present) and read settings from the process environment.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup. Unparseable values
    /// fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(region) = get("AWS_REGION") {
            cfg.default_region = region;
        }
        if let Some(endpoint) = get("AWS_ENDPOINT_URL") {
            cfg.endpoint_url = Some(endpoint);
            // Virtual-hosted style does not work with custom endpoints.
            cfg.force_path_style = true;
        }
        if let Some(path) = get("AWS_CA_BUNDLE_PATH") {
            cfg.ca_bundle_path = Some(PathBuf::from(path));
        }
        if let Some(proto) = get("S3FS_ENDPOINT_PROTOCOL") {
            let proto = proto.to_lowercase();
            if proto == "http" || proto == "https" {
                cfg.endpoint_protocol = proto;
            }
        }
        if let Some(n) = get("S3FS_RT_THREADS").and_then(|s| s.parse::<usize>().ok()) {
            cfg.worker_threads = n.clamp(1, MAX_WORKER_THREADS);
        }
        if let Some(n) = get("S3FS_UPLOAD_MEMORY_CEILING").and_then(|s| s.parse().ok()) {
            cfg.upload_memory_ceiling = n;
        }
        if let Some(n) = get("S3FS_PIPE_CAPACITY").and_then(|s| s.parse::<usize>().ok()) {
            cfg.pipe_capacity = n.max(1);
        }
        if let Some(n) = get("S3FS_LIST_PAGE_SIZE").and_then(|s| s.parse::<i32>().ok()) {
            if n > 0 {
                cfg.list_page_size = Some(n);
            }
        }
        if let Some(dir) = get("S3FS_SPILL_DIR") {
            cfg.spill_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = get("S3FS_OPERATION_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            cfg.operation_timeout = Duration::from_secs(secs);
        }
        cfg
    }
}

fn default_worker_threads() -> usize {
    num_cpus::get().clamp(MIN_WORKER_THREADS, MAX_WORKER_THREADS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = FsConfig::from_lookup(|_| None);
        assert_eq!(cfg.default_region, "us-east-1");
        assert_eq!(cfg.upload_memory_ceiling, 5 * 1024 * 1024);
        assert_eq!(cfg.endpoint_protocol, "https");
        assert!(cfg.endpoint_url.is_none());
        assert!(!cfg.force_path_style);
    }

    #[test]
    fn endpoint_forces_path_style() {
        let cfg = FsConfig::from_lookup(lookup(&[
            ("AWS_ENDPOINT_URL", "http://localhost:9000"),
            ("AWS_REGION", "eu-west-1"),
        ]));
        assert_eq!(cfg.endpoint_url.as_deref(), Some("http://localhost:9000"));
        assert!(cfg.force_path_style);
        assert_eq!(cfg.default_region, "eu-west-1");
    }

    #[test]
    fn bad_numbers_fall_back() {
        let cfg = FsConfig::from_lookup(lookup(&[
            ("S3FS_UPLOAD_MEMORY_CEILING", "lots"),
            ("S3FS_PIPE_CAPACITY", "0"),
            ("S3FS_ENDPOINT_PROTOCOL", "ftp"),
            ("S3FS_LIST_PAGE_SIZE", "-3"),
        ]));
        assert_eq!(cfg.upload_memory_ceiling, DEFAULT_UPLOAD_MEMORY_CEILING);
        assert_eq!(cfg.pipe_capacity, 1);
        assert_eq!(cfg.endpoint_protocol, "https");
        assert_eq!(cfg.list_page_size, None);
    }
}
