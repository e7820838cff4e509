// src/memory_client.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! In-process [`ObjectClient`]: buckets of objects in sorted maps.
//!
//! Listing, delimiter and pagination behave like ListObjectsV2, puts verify
//! the declared content length and honour `If-None-Match: *`. Used by the
//! test suite through [`MemoryClientFactory`], and handy for embedding.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};

use crate::constants::SPILL_READ_CHUNK_SIZE;
use crate::object_client::{
    BucketInfo, ClientError, ClientFactory, ClientResult, ClientTarget, ListPage, ListRequest,
    ObjectBody, ObjectClient, ObjectMetadata, ObjectSummary, PutOutput, PutRequest, RequestBody,
};

const DEFAULT_MAX_KEYS: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    e_tag: String,
    last_modified: DateTime<Utc>,
    content_type: Option<String>,
}

impl StoredObject {
    fn metadata(&self) -> ObjectMetadata {
        ObjectMetadata {
            content_length: Some(self.data.len() as u64),
            e_tag: Some(self.e_tag.clone()),
            last_modified: Some(self.last_modified),
            content_type: self.content_type.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Bucket {
    region: String,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, Bucket>,
    put_failure: Option<String>,
    delete_failure: Option<String>,
    denied: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryObjectClient {
    state: Mutex<State>,
}

fn e_tag_of(data: &[u8]) -> String {
    format!("\"{:08x}\"", crc32fast::hash(data))
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_bucket(&self, bucket: &str, region: &str) {
        self.lock()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .region = region.to_string();
    }

    /// Store an object directly, bypassing the put path.
    pub fn put_bytes(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let mut state = self.lock();
        let objects = &mut state.buckets.entry(bucket.to_string()).or_default().objects;
        objects.insert(
            key.to_string(),
            StoredObject {
                e_tag: e_tag_of(&data),
                data,
                last_modified: Utc::now(),
                content_type: None,
            },
        );
    }

    pub fn get_bytes(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|o| o.data.clone())
    }

    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .and_then(|o| o.content_type.clone())
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .buckets
            .get(bucket)
            .map(|b| b.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Make every subsequent put fail with `reason` (`None` clears it).
    pub fn set_put_failure(&self, reason: Option<&str>) {
        self.lock().put_failure = reason.map(str::to_string);
    }

    /// Make every subsequent delete fail with `reason` (`None` clears it).
    pub fn set_delete_failure(&self, reason: Option<&str>) {
        self.lock().delete_failure = reason.map(str::to_string);
    }

    /// Deny every request against `bucket`.
    pub fn deny_bucket(&self, bucket: &str) {
        self.lock().denied.push(bucket.to_string());
    }

    fn check_access(state: &State, bucket: &str) -> ClientResult<()> {
        if state.denied.iter().any(|b| b == bucket) {
            return Err(ClientError::AccessDenied(bucket.to_string()));
        }
        Ok(())
    }

    fn bucket<'a>(state: &'a State, bucket: &str) -> ClientResult<&'a Bucket> {
        Self::check_access(state, bucket)?;
        state
            .buckets
            .get(bucket)
            .ok_or_else(|| ClientError::NoSuchBucket(bucket.to_string()))
    }

    fn object(&self, bucket: &str, key: &str) -> ClientResult<StoredObject> {
        let state = self.lock();
        Self::bucket(&state, bucket)?.objects.get(key).cloned().ok_or_else(|| {
            ClientError::NoSuchKey { bucket: bucket.to_string(), key: key.to_string() }
        })
    }
}

#[async_trait]
impl ObjectClient for MemoryObjectClient {
    async fn head_bucket(&self, bucket: &str) -> ClientResult<BucketInfo> {
        let state = self.lock();
        let b = Self::bucket(&state, bucket)?;
        Ok(BucketInfo { region: Some(b.region.clone()) })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> ClientResult<ObjectMetadata> {
        Ok(self.object(bucket, key)?.metadata())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> ClientResult<ObjectBody> {
        let obj = self.object(bucket, key)?;
        let metadata = obj.metadata();
        let data = obj.data;
        let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
            .step_by(SPILL_READ_CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..(start + SPILL_READ_CHUNK_SIZE).min(data.len()))))
            .collect();
        Ok(ObjectBody { metadata, stream: stream::iter(chunks).boxed() })
    }

    async fn put_object(&self, request: PutRequest, body: RequestBody) -> ClientResult<PutOutput> {
        {
            let state = self.lock();
            Self::bucket(&state, &request.bucket)?;
            if let Some(reason) = &state.put_failure {
                return Err(ClientError::Other(anyhow!("injected put failure: {reason}")));
            }
        }

        let declared = body.content_length();
        let mut stream = body.open()?.into_stream();
        let mut buf = BytesMut::with_capacity(declared.min(64 * 1024 * 1024) as usize);
        while let Some(chunk) = stream
            .try_next()
            .await
            .map_err(|e| ClientError::Other(anyhow!(e).context("reading request body")))?
        {
            buf.extend_from_slice(&chunk);
        }
        if buf.len() as u64 != declared {
            return Err(ClientError::Other(anyhow!(
                "request body had {} bytes, expected {declared}",
                buf.len()
            )));
        }

        let data = buf.freeze();
        let e_tag = e_tag_of(&data);
        let mut state = self.lock();
        let b = state
            .buckets
            .get_mut(&request.bucket)
            .ok_or_else(|| ClientError::NoSuchBucket(request.bucket.clone()))?;
        if request.if_none_match && b.objects.contains_key(&request.key) {
            return Err(ClientError::PreconditionFailed(request.key));
        }
        b.objects.insert(
            request.key,
            StoredObject {
                data,
                e_tag: e_tag.clone(),
                last_modified: Utc::now(),
                content_type: body.content_type().map(str::to_string),
            },
        );
        Ok(PutOutput { e_tag: Some(e_tag) })
    }

    async fn list_objects(&self, request: ListRequest) -> ClientResult<ListPage> {
        let state = self.lock();
        let b = Self::bucket(&state, &request.bucket)?;
        let max_keys = request
            .max_keys
            .and_then(|m| usize::try_from(m).ok())
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_MAX_KEYS);

        // Keys and rolled-up prefixes in lexicographic order, as S3 returns them.
        let mut entries: BTreeMap<String, Option<&StoredObject>> = BTreeMap::new();
        for (key, obj) in b.objects.range(request.prefix.clone()..) {
            let Some(rest) = key.strip_prefix(request.prefix.as_str()) else { break };
            let rolled = request
                .delimiter
                .as_deref()
                .filter(|d| !d.is_empty())
                .and_then(|d| rest.find(d).map(|pos| (pos, d.len())));
            match rolled {
                Some((pos, len)) => {
                    let common = format!("{}{}", request.prefix, &rest[..pos + len]);
                    entries.entry(common).or_insert(None);
                }
                None => {
                    entries.insert(key.clone(), Some(obj));
                }
            }
        }

        let start = request.continuation_token.as_deref();
        let mut remaining = entries
            .into_iter()
            .filter(|(k, _)| start.is_none_or(|t| k.as_str() > t));

        let mut page = ListPage::default();
        let mut last = None;
        for (key, obj) in remaining.by_ref().take(max_keys) {
            match obj {
                Some(o) => page.contents.push(ObjectSummary {
                    key: key.clone(),
                    size: o.data.len() as u64,
                    e_tag: Some(o.e_tag.clone()),
                    last_modified: Some(o.last_modified),
                }),
                None => page.common_prefixes.push(key.clone()),
            }
            last = Some(key);
        }
        if remaining.next().is_some() {
            page.next_continuation_token = last;
        }
        Ok(page)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ClientResult<()> {
        let mut state = self.lock();
        Self::check_access(&state, bucket)?;
        if let Some(reason) = &state.delete_failure {
            return Err(ClientError::Other(anyhow!("injected delete failure: {reason}")));
        }
        let b = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ClientError::NoSuchBucket(bucket.to_string()))?;
        b.objects.remove(key);
        Ok(())
    }
}

/// Hands the same shared [`MemoryObjectClient`] to every target, and records
/// the targets it was asked for.
#[derive(Debug, Default)]
pub struct MemoryClientFactory {
    client: Arc<MemoryObjectClient>,
    targets: Mutex<Vec<ClientTarget>>,
}

impl MemoryClientFactory {
    pub fn new(client: Arc<MemoryObjectClient>) -> Self {
        Self { client, targets: Mutex::new(Vec::new()) }
    }

    pub fn client(&self) -> &Arc<MemoryObjectClient> {
        &self.client
    }

    pub fn targets(&self) -> Vec<ClientTarget> {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ClientFactory for MemoryClientFactory {
    async fn create_client(&self, target: &ClientTarget) -> anyhow::Result<Arc<dyn ObjectClient>> {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(target.clone());
        Ok(self.client.clone())
    }
}
