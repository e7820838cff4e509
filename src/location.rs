// src/location.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Object locations: `s3://bucket/key` and `s3x://[ak:secret@]host[:port]/bucket/key`.
//!
//! A [`Location`] is the parsed, validated form of either URI. Its
//! [`identity`](Location::identity) decides which cached file system a
//! location belongs to: two locations on the same backend + bucket share one.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::{S3_SCHEME, S3X_SCHEME, SEPARATOR_CHAR};
use crate::error::{FsError, Result};

static IPV4_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").expect("static regex"));

/// Check a bucket name against the DNS-compatible naming rules.
pub fn validate_bucket_name(name: &str) -> std::result::Result<(), String> {
    if name.len() < 3 || name.len() > 63 {
        return Err(format!("bucket name must be 3-63 characters, got {}", name.len()));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '.' || *c == '-'))
    {
        return Err(format!("bucket name contains invalid character '{c}'"));
    }
    let first = name.as_bytes()[0];
    let last = name.as_bytes()[name.len() - 1];
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err("bucket name must start and end with a letter or digit".to_string());
    }
    if name.contains("..") || name.contains(".-") || name.contains("-.") {
        return Err("bucket name has adjacent periods or dashes".to_string());
    }
    if IPV4_LIKE.is_match(name) {
        return Err("bucket name must not be formatted as an IP address".to_string());
    }
    Ok(())
}

/// Static access-key credentials carried in an `s3x` authority.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self { access_key: access_key.into(), secret_key: secret_key.into() }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"****")
            .finish()
    }
}

/// Explicit endpoint (and optionally credentials) for an `s3x` location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Authority {
    credentials: Option<Credentials>,
    host: String,
    port: Option<u16>,
}

impl Authority {
    pub fn new(host: impl Into<String>, port: Option<u16>, credentials: Option<Credentials>) -> Self {
        Self { credentials, host: host.into(), port }
    }

    /// Parse the raw (still percent-encoded) authority component.
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let (user_info, endpoint) = match raw.rsplit_once('@') {
            Some((u, e)) => (Some(u), e),
            None => (None, raw),
        };

        let credentials = match user_info {
            None => None,
            Some(info) => {
                let (ak, sk) = info
                    .split_once(':')
                    .ok_or("user info must contain both access key and secret")?;
                let ak = urlencoding::decode(ak).map_err(|e| format!("bad access key: {e}"))?;
                let sk = urlencoding::decode(sk).map_err(|e| format!("bad secret: {e}"))?;
                if ak.is_empty() || sk.is_empty() {
                    return Err("user info must contain both access key and secret".to_string());
                }
                Some(Credentials::new(ak.into_owned(), sk.into_owned()))
            }
        };

        let (host, port) = split_host_port(endpoint)?;
        if host.is_empty() {
            return Err("endpoint host is empty".to_string());
        }
        Ok(Self { credentials, host: host.to_string(), port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// `host[:port]`
    pub fn endpoint(&self) -> String {
        match self.port {
            Some(p) => format!("{}:{}", self.host, p),
            None => self.host.clone(),
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(c) = &self.credentials {
            write!(
                f,
                "{}:{}@",
                urlencoding::encode(c.access_key()),
                urlencoding::encode(c.secret_key())
            )?;
        }
        f.write_str(&self.endpoint())
    }
}

fn split_host_port(endpoint: &str) -> std::result::Result<(&str, Option<u16>), String> {
    // Bracketed IPv6 literal: [::1]:9000
    if let Some(rest) = endpoint.strip_prefix('[') {
        let (_, after) = rest.split_once(']').ok_or("unterminated IPv6 literal")?;
        let host_len = endpoint.len() - after.len();
        let port = match after.strip_prefix(':') {
            Some(p) => Some(parse_port(p)?),
            None if after.is_empty() => None,
            None => return Err(format!("unexpected characters after host: '{after}'")),
        };
        return Ok((&endpoint[..host_len], port));
    }
    match endpoint.rsplit_once(':') {
        Some((host, p)) => Ok((host, Some(parse_port(p)?))),
        None => Ok((endpoint, None)),
    }
}

fn parse_port(p: &str) -> std::result::Result<u16, String> {
    p.parse::<u16>().map_err(|_| format!("invalid port '{p}'"))
}

/// A bucket + key, optionally bound to an explicit endpoint authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    bucket: String,
    key: String,
    authority: Option<Authority>,
}

impl Location {
    /// Build a location on the default endpoint. Leading separators on `key`
    /// are dropped.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        let key = key.into();
        validate_bucket_name(&bucket)
            .map_err(|reason| FsError::malformed(format!("{S3_SCHEME}://{bucket}/{key}"), reason))?;
        Ok(Self {
            bucket,
            key: key.trim_start_matches(SEPARATOR_CHAR).to_string(),
            authority: None,
        })
    }

    pub fn with_authority(mut self, authority: Option<Authority>) -> Self {
        self.authority = authority;
        self
    }

    /// Parse either URI form.
    pub fn parse(uri: &str) -> Result<Self> {
        let malformed = |reason: &str| FsError::malformed(uri, reason);

        let (scheme, rest) = uri.split_once("://").ok_or_else(|| malformed("missing scheme"))?;
        let scheme = scheme.to_ascii_lowercase();
        let (authority, path) = match rest.find(SEPARATOR_CHAR) {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, ""),
        };

        match scheme.as_str() {
            S3_SCHEME => {
                validate_bucket_name(authority).map_err(|r| malformed(&r))?;
                Ok(Self {
                    bucket: authority.to_string(),
                    key: path.trim_start_matches(SEPARATOR_CHAR).to_string(),
                    authority: None,
                })
            }
            S3X_SCHEME => {
                let authority = Authority::parse(authority).map_err(|r| malformed(&r))?;
                let path = path
                    .strip_prefix(SEPARATOR_CHAR)
                    .ok_or_else(|| malformed("s3x path must name a bucket"))?;
                let (bucket, key) = path.split_once(SEPARATOR_CHAR).unwrap_or((path, ""));
                if bucket.is_empty() {
                    return Err(malformed("s3x path must name a bucket"));
                }
                validate_bucket_name(bucket).map_err(|r| malformed(&r))?;
                Ok(Self {
                    bucket: bucket.to_string(),
                    key: key.trim_start_matches(SEPARATOR_CHAR).to_string(),
                    authority: Some(authority),
                })
            }
            other => Err(malformed(&format!("unrecognized scheme '{other}'"))),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn authority(&self) -> Option<&Authority> {
        self.authority.as_ref()
    }

    pub fn scheme(&self) -> &'static str {
        if self.authority.is_some() { S3X_SCHEME } else { S3_SCHEME }
    }

    /// Cache key for the file system this location belongs to.
    ///
    /// - `s3`: the bucket name
    /// - `s3x`: `[accessKey@]host[:port]/bucket`
    pub fn identity(&self) -> String {
        match &self.authority {
            None => self.bucket.clone(),
            Some(a) => {
                let mut id = String::new();
                if let Some(c) = a.credentials() {
                    id.push_str(c.access_key());
                    id.push('@');
                }
                id.push_str(&a.endpoint());
                id.push(SEPARATOR_CHAR);
                id.push_str(&self.bucket);
                id
            }
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.authority {
            None => write!(f, "{}://{}/{}", S3_SCHEME, self.bucket, self.key),
            Some(a) => write!(f, "{}://{}/{}/{}", S3X_SCHEME, a, self.bucket, self.key),
        }
    }
}

impl FromStr for Location {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
