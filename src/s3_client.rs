// src/s3_client.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! [`ObjectClient`] backed by the async AWS Rust SDK.
//!
//! Clients are built per (region, endpoint) by [`AwsClientFactory`] from an
//! explicit [`FsConfig`]; there is no global client.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials as SdkCredentials, Region, RequestChecksumCalculation};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream, DateTime as SdkDateTime};
use aws_sdk_s3::Client;
use aws_smithy_http_client::tls;
use aws_smithy_http_client::tls::rustls_provider::CryptoMode;
use aws_smithy_types::body::SdkBody;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use http_body::Frame;
use http_body_util::StreamBody;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::config::FsConfig;
use crate::object_client::{
    BodySource, BucketInfo, ClientError, ClientFactory, ClientResult, ClientTarget, ListPage,
    ListRequest, ObjectBody, ObjectClient, ObjectMetadata, ObjectSummary, PutOutput, PutRequest,
    RequestBody,
};

// -----------------------------------------------------------------------------
// TLS helper, for CA bundle
// -----------------------------------------------------------------------------

/// Create a TLS context using a CA bundle file
fn tls_context_from_pem(filename: impl AsRef<Path>) -> anyhow::Result<tls::TlsContext> {
    let pem_contents = fs::read(&filename).with_context(|| {
        format!("Failed to read CA bundle file: {}", filename.as_ref().display())
    })?;

    let trust_store = tls::TrustStore::empty().with_pem_certificate(pem_contents.as_slice());

    tls::TlsContext::builder()
        .with_trust_store(trust_store)
        .build()
        .with_context(|| {
            format!("Failed to build TLS context from PEM {}", filename.as_ref().display())
        })
}

// -----------------------------------------------------------------------------
// Client factory
// -----------------------------------------------------------------------------

/// Builds [`AwsObjectClient`]s from an [`FsConfig`].
#[derive(Debug, Clone)]
pub struct AwsClientFactory {
    config: Arc<FsConfig>,
}

impl AwsClientFactory {
    pub fn new(config: Arc<FsConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClientFactory for AwsClientFactory {
    async fn create_client(&self, target: &ClientTarget) -> anyhow::Result<Arc<dyn ObjectClient>> {
        let cfg = &self.config;

        let http_client = match &cfg.ca_bundle_path {
            Some(ca_bundle_path) => {
                info!("Loading CA bundle from: {}", ca_bundle_path.display());
                let tls_context = tls_context_from_pem(ca_bundle_path)?;
                Some(
                    aws_smithy_http_client::Builder::new()
                        .tls_provider(tls::Provider::Rustls(CryptoMode::AwsLc))
                        .tls_context(tls_context)
                        .build_https(),
                )
            }
            None => None,
        };

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(target.region.clone()));

        // s3x authorities carry their own endpoint and, optionally, static keys.
        let endpoint = match &target.authority {
            Some(authority) => {
                if let Some(creds) = authority.credentials() {
                    loader = loader.credentials_provider(SdkCredentials::new(
                        creds.access_key(),
                        creds.secret_key(),
                        None,
                        None,
                        "s3x-location",
                    ));
                }
                Some(format!("{}://{}", cfg.endpoint_protocol, authority.endpoint()))
            }
            None => cfg.endpoint_url.clone(),
        };
        if let Some(endpoint) = &endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let timeout_config = TimeoutConfig::builder()
            .connect_timeout(cfg.connect_timeout)
            .operation_timeout(cfg.operation_timeout)
            .build();
        loader = loader.timeout_config(timeout_config);

        if let Some(client) = http_client {
            loader = loader.http_client(client);
        }

        let sdk_config = loader.load().await;

        // Checksums only when an operation requires one.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(cfg.force_path_style || target.authority.is_some())
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .build();

        debug!(
            "Created S3 client: region={}, endpoint={}",
            target.region,
            endpoint.as_deref().unwrap_or("<default>")
        );
        Ok(Arc::new(AwsObjectClient::new(Client::from_conf(s3_config))))
    }
}

// -----------------------------------------------------------------------------
// Client
// -----------------------------------------------------------------------------

#[derive(Clone)]
pub struct AwsObjectClient {
    client: Client,
}

impl AwsObjectClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl fmt::Debug for AwsObjectClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsObjectClient").finish_non_exhaustive()
    }
}

/// Map an SDK failure onto [`ClientError`] using the error code when the
/// service sent one and the HTTP status otherwise (HEAD responses have no
/// body, hence no code).
fn classify<E>(err: SdkError<E, HttpResponse>, bucket: &str, key: Option<&str>) -> ClientError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let not_found = || match key {
        Some(k) => ClientError::NoSuchKey { bucket: bucket.to_string(), key: k.to_string() },
        None => ClientError::NoSuchBucket(bucket.to_string()),
    };
    let target = || match key {
        Some(k) => format!("{bucket}/{k}"),
        None => bucket.to_string(),
    };

    match (err.code(), status) {
        (Some("NoSuchBucket"), _) => ClientError::NoSuchBucket(bucket.to_string()),
        (Some("NoSuchKey") | Some("NotFound"), _) | (_, Some(404)) => not_found(),
        (Some("AccessDenied") | Some("Forbidden"), _) | (_, Some(403)) => {
            ClientError::AccessDenied(target())
        }
        (Some("PreconditionFailed"), _) | (_, Some(412)) => {
            ClientError::PreconditionFailed(target())
        }
        _ => ClientError::Other(anyhow!("{}", DisplayErrorContext(&err)).context(target())),
    }
}

fn to_chrono(dt: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn to_length(len: Option<i64>) -> Option<u64> {
    len.and_then(|l| u64::try_from(l).ok())
}

/// Convert a one-shot [`BodySource`] into an SDK body.
async fn into_byte_stream(source: BodySource) -> ClientResult<ByteStream> {
    match source {
        BodySource::Bytes(b) => Ok(ByteStream::from(b)),
        BodySource::File(path) => ByteStream::from_path(&path)
            .await
            .with_context(|| format!("failed to open upload source {}", path.display()))
            .map_err(ClientError::Other),
        BodySource::Stream(mut chunks) => {
            // The SDK body must be Sync; a channel receiver is, a boxed stream is not.
            let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(4);
            tokio::spawn(async move {
                while let Some(chunk) = chunks.next().await {
                    let stop = chunk.is_err();
                    if tx.send(chunk).await.is_err() || stop {
                        break;
                    }
                }
            });
            let frames = ReceiverStream::new(rx).map_ok(Frame::data);
            Ok(ByteStream::new(SdkBody::from_body_1_x(StreamBody::new(frames))))
        }
    }
}

#[async_trait]
impl ObjectClient for AwsObjectClient {
    async fn head_bucket(&self, bucket: &str) -> ClientResult<BucketInfo> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(out) => Ok(BucketInfo { region: out.bucket_region().map(str::to_string) }),
            Err(e) => {
                // A client bound to the wrong region gets a redirect that
                // still names the bucket's region.
                let region = e
                    .raw_response()
                    .and_then(|r| r.headers().get("x-amz-bucket-region"))
                    .map(str::to_string);
                match region {
                    Some(region) => Ok(BucketInfo { region: Some(region) }),
                    None => Err(classify(e, bucket, None)),
                }
            }
        }
    }

    async fn head_object(&self, bucket: &str, key: &str) -> ClientResult<ObjectMetadata> {
        let out = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, bucket, Some(key)))?;
        Ok(ObjectMetadata {
            content_length: to_length(out.content_length()),
            e_tag: out.e_tag().map(str::to_string),
            last_modified: out.last_modified().and_then(to_chrono),
            content_type: out.content_type().map(str::to_string),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> ClientResult<ObjectBody> {
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, bucket, Some(key)))?;

        let metadata = ObjectMetadata {
            content_length: to_length(out.content_length()),
            e_tag: out.e_tag().map(str::to_string),
            last_modified: out.last_modified().and_then(to_chrono),
            content_type: out.content_type().map(str::to_string),
        };
        let stream = stream::unfold(out.body, |mut body| async move {
            body.next().await.map(|chunk| (chunk.map_err(io::Error::other), body))
        })
        .boxed();
        Ok(ObjectBody { metadata, stream })
    }

    async fn put_object(&self, request: PutRequest, body: RequestBody) -> ClientResult<PutOutput> {
        let source = body.open()?;
        let stream = into_byte_stream(source).await?;

        let mut req = self
            .client
            .put_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .content_length(body.content_length() as i64)
            .set_content_type(body.content_type().map(str::to_string))
            .body(stream);
        if request.if_none_match {
            req = req.if_none_match("*");
        }

        let out = req
            .send()
            .await
            .map_err(|e| classify(e, &request.bucket, Some(&request.key)))?;
        Ok(PutOutput { e_tag: out.e_tag().map(str::to_string) })
    }

    async fn list_objects(&self, request: ListRequest) -> ClientResult<ListPage> {
        let out = self
            .client
            .list_objects_v2()
            .bucket(&request.bucket)
            .prefix(&request.prefix)
            .set_delimiter(request.delimiter.clone())
            .set_max_keys(request.max_keys)
            .set_continuation_token(request.continuation_token.clone())
            .send()
            .await
            .map_err(|e| classify(e, &request.bucket, None))?;

        let common_prefixes = out
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();
        let contents = out
            .contents()
            .iter()
            .filter_map(|o| {
                o.key().map(|k| ObjectSummary {
                    key: k.to_string(),
                    size: to_length(o.size()).unwrap_or(0),
                    e_tag: o.e_tag().map(str::to_string),
                    last_modified: o.last_modified().and_then(to_chrono),
                })
            })
            .collect();

        Ok(ListPage {
            common_prefixes,
            contents,
            next_continuation_token: out
                .next_continuation_token()
                .filter(|_| out.is_truncated().unwrap_or(false))
                .map(str::to_string),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ClientResult<()> {
        match self.client.delete_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(()),
            Err(e) => match classify(e, bucket, Some(key)) {
                ClientError::NoSuchKey { .. } => Ok(()),
                other => Err(other),
            },
        }
    }
}
