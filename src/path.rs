// src/path.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Hierarchical paths over a flat key space.
//!
//! An [`S3Path`] is a sequence of segments plus an absolute flag and a
//! trailing-separator ("directory") flag, owned by one [`S3FileSystem`].
//! Paths are immutable: `resolve`, `parent` and `normalize` build new ones.
//! The object key of an absolute, normalized path is its segments joined by
//! `/`, with a trailing `/` for directory paths; the root's key is empty.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::constants::{SEPARATOR, SEPARATOR_CHAR};
use crate::error::{FsError, Result};
use crate::filesystem::S3FileSystem;
use crate::location::Location;

#[derive(Clone)]
pub struct S3Path {
    fs: Arc<S3FileSystem>,
    absolute: bool,
    segments: Vec<String>,
    directory: bool,
}

impl S3Path {
    /// Parse a path string. Repeated separators collapse; a trailing
    /// separator marks a directory path. `.` and `..` are kept until
    /// [`normalize`](Self::normalize).
    pub(crate) fn parse(fs: Arc<S3FileSystem>, path: &str) -> Self {
        let absolute = path.starts_with(SEPARATOR_CHAR);
        let segments: Vec<String> = path
            .split(SEPARATOR_CHAR)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let directory = path.ends_with(SEPARATOR_CHAR)
            || matches!(segments.last().map(String::as_str), Some(".") | Some(".."));
        Self { fs, absolute, segments, directory }
    }

    /// Absolute path for an object key (as returned by a listing).
    pub(crate) fn from_key(fs: Arc<S3FileSystem>, key: &str) -> Self {
        let mut path = Self::parse(fs, key);
        path.absolute = true;
        path
    }

    pub(crate) fn root_of(fs: Arc<S3FileSystem>) -> Self {
        Self { fs, absolute: true, segments: Vec::new(), directory: true }
    }

    fn derive(&self, absolute: bool, segments: Vec<String>, directory: bool) -> Self {
        Self { fs: Arc::clone(&self.fs), absolute, segments, directory }
    }

    pub fn file_system(&self) -> &Arc<S3FileSystem> {
        &self.fs
    }

    pub fn bucket_name(&self) -> &str {
        self.fs.bucket_name()
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn is_root(&self) -> bool {
        self.absolute && self.segments.is_empty()
    }

    /// Syntactic directory test: root, empty, or written with a trailing
    /// separator. Whether a prefix actually has children is answered by
    /// [`crate::directory::exists`].
    pub fn is_directory(&self) -> bool {
        self.directory || self.segments.is_empty()
    }

    pub fn root(&self) -> Option<S3Path> {
        self.absolute.then(|| Self::root_of(Arc::clone(&self.fs)))
    }

    /// Last segment as a relative path.
    pub fn file_name(&self) -> Option<S3Path> {
        self.segments
            .last()
            .map(|name| self.derive(false, vec![name.clone()], self.directory))
    }

    pub fn parent(&self) -> Option<S3Path> {
        match self.segments.len() {
            0 => None,
            1 if self.absolute => self.root(),
            1 => None,
            n => Some(self.derive(self.absolute, self.segments[..n - 1].to_vec(), true)),
        }
    }

    pub fn name_count(&self) -> usize {
        self.segments.len()
    }

    pub fn name(&self, index: usize) -> Option<S3Path> {
        let last = index + 1 == self.segments.len();
        self.segments
            .get(index)
            .map(|n| self.derive(false, vec![n.clone()], if last { self.directory } else { true }))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }

    pub fn starts_with(&self, other: &S3Path) -> bool {
        self.fs.identity() == other.fs.identity()
            && self.absolute == other.absolute
            && other.segments.len() <= self.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// If `other` is absolute it is returned unchanged, otherwise its
    /// segments are appended to this path's.
    pub fn resolve(&self, other: &S3Path) -> S3Path {
        if other.absolute {
            return other.clone();
        }
        if other.segments.is_empty() {
            return self.clone();
        }
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        self.derive(self.absolute, segments, other.directory)
    }

    pub fn resolve_str(&self, other: &str) -> S3Path {
        self.resolve(&Self::parse(Arc::clone(&self.fs), other))
    }

    /// Drop `.` segments and fold `..` into the preceding real segment.
    /// Fails with `InvalidPath` when `..` would climb above the root.
    pub fn normalize(&self) -> Result<S3Path> {
        let mut out: Vec<String> = Vec::with_capacity(self.segments.len());
        for seg in &self.segments {
            match seg.as_str() {
                "." => {}
                ".." => {
                    if out.pop().is_none() {
                        return Err(FsError::invalid_path(
                            self.to_string(),
                            "'..' escapes the root",
                        ));
                    }
                }
                _ => out.push(seg.clone()),
            }
        }
        Ok(self.derive(self.absolute, out, self.directory))
    }

    pub fn to_absolute(&self) -> S3Path {
        self.derive(true, self.segments.clone(), self.directory)
    }

    /// Absolute + normalized. Relative paths resolve against the root.
    /// Idempotent: `p.to_real_path()?.to_real_path()? == p.to_real_path()?`.
    pub fn to_real_path(&self) -> Result<S3Path> {
        self.to_absolute().normalize()
    }

    /// Object key derived from this path's segments (no normalization).
    pub fn key(&self) -> String {
        let mut key = self.segments.join(SEPARATOR);
        if self.directory && !key.is_empty() {
            key.push_str(SEPARATOR);
        }
        key
    }

    /// Key with a trailing separator, as used for prefix listings. Empty for root.
    pub(crate) fn directory_prefix(&self) -> String {
        let mut key = self.segments.join(SEPARATOR);
        if !key.is_empty() {
            key.push_str(SEPARATOR);
        }
        key
    }

    /// Full location of the object this path names.
    pub fn to_location(&self) -> Result<Location> {
        let real = self.to_real_path()?;
        Ok(Location::new(self.fs.bucket_name(), real.key())?
            .with_authority(self.fs.authority().cloned()))
    }

    pub fn to_uri(&self) -> Result<String> {
        Ok(self.to_location()?.to_string())
    }
}

impl fmt::Display for S3Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            f.write_str(SEPARATOR)?;
        }
        f.write_str(&self.segments.join(SEPARATOR))?;
        if self.directory && !self.segments.is_empty() {
            f.write_str(SEPARATOR)?;
        }
        Ok(())
    }
}

impl fmt::Debug for S3Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S3Path({}:{})", self.fs.identity(), self)
    }
}

impl PartialEq for S3Path {
    fn eq(&self, other: &Self) -> bool {
        self.fs.identity() == other.fs.identity()
            && self.absolute == other.absolute
            && self.is_directory() == other.is_directory()
            && self.segments == other.segments
    }
}

impl Eq for S3Path {}

impl Hash for S3Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fs.identity().hash(state);
        self.absolute.hash(state);
        self.is_directory().hash(state);
        self.segments.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::tests::test_filesystem;

    fn p(s: &str) -> S3Path {
        S3Path::parse(test_filesystem("example"), s)
    }

    #[test]
    fn string_form_round_trips() {
        for s in ["/", "/alpha", "/alpha/", "/alpha/beta/hello.txt", "rel/x", "rel/dir/", ""] {
            assert_eq!(p(s).to_string(), s);
        }
    }

    #[test]
    fn repeated_separators_collapse() {
        assert_eq!(p("//alpha///beta//").to_string(), "/alpha/beta/");
        assert_eq!(p("/alpha//hello.txt").key(), "alpha/hello.txt");
    }

    #[test]
    fn root_has_empty_key() {
        let root = p("/");
        assert!(root.is_root());
        assert!(root.is_directory());
        assert_eq!(root.key(), "");
        assert_eq!(root.directory_prefix(), "");
    }

    #[test]
    fn directory_keys_keep_trailing_separator() {
        assert_eq!(p("/alpha/").key(), "alpha/");
        assert_eq!(p("/alpha").key(), "alpha");
        assert_eq!(p("/alpha").directory_prefix(), "alpha/");
        assert!(p("/alpha/").is_directory());
        assert!(!p("/alpha").is_directory());
    }

    #[test]
    fn normalize_folds_dots() {
        assert_eq!(p("/a/./b/../c").normalize().unwrap().to_string(), "/a/c");
        assert_eq!(p("/a/b/..").normalize().unwrap().to_string(), "/a/");
        assert_eq!(p("a/./b").normalize().unwrap().to_string(), "a/b");
    }

    #[test]
    fn normalize_rejects_escape() {
        let err = p("/a/../../b").normalize().unwrap_err();
        assert!(matches!(err, FsError::InvalidPath { .. }));
        assert!(p("../x").normalize().is_err());
    }

    #[test]
    fn normalize_is_idempotent() {
        for s in ["/a/./b/../c/", "/x//y/./z", "/", "/a/b/c/..", "q/./r"] {
            let once = p(s).normalize().unwrap();
            let twice = once.normalize().unwrap();
            assert_eq!(once, twice, "{s}");
        }
    }

    #[test]
    fn real_path_is_idempotent_and_absolute() {
        let real = p("alpha/./hello.txt").to_real_path().unwrap();
        assert!(real.is_absolute());
        assert_eq!(real.to_string(), "/alpha/hello.txt");
        assert_eq!(real.to_real_path().unwrap(), real);
    }

    #[test]
    fn resolve_semantics() {
        let base = p("/alpha/");
        assert_eq!(base.resolve(&p("hello.txt")).to_string(), "/alpha/hello.txt");
        assert_eq!(base.resolve(&p("/other")).to_string(), "/other");
        assert_eq!(base.resolve(&p("")), base);
        assert_eq!(base.resolve_str("sub/").to_string(), "/alpha/sub/");
    }

    #[test]
    fn parent_and_file_name() {
        let path = p("/alpha/beta/hello.txt");
        assert_eq!(path.parent().unwrap().to_string(), "/alpha/beta/");
        assert_eq!(path.file_name().unwrap().to_string(), "hello.txt");
        assert_eq!(p("/alpha").parent().unwrap(), p("/"));
        assert!(p("/").parent().is_none());
        assert!(p("rel").parent().is_none());
        assert_eq!(path.name_count(), 3);
        assert_eq!(path.name(1).unwrap().to_string(), "beta/");
        assert_eq!(path.names().collect::<Vec<_>>(), vec!["alpha", "beta", "hello.txt"]);
    }

    #[test]
    fn starts_with_compares_segments() {
        assert!(p("/alpha/beta").starts_with(&p("/alpha")));
        assert!(!p("/alphabet").starts_with(&p("/alpha")));
        assert!(!p("alpha/beta").starts_with(&p("/alpha")));
    }

    #[test]
    fn to_uri_uses_bucket() {
        assert_eq!(p("/alpha/hello.txt").to_uri().unwrap(), "s3://example/alpha/hello.txt");
        assert_eq!(p("/").to_uri().unwrap(), "s3://example/");
    }
}
