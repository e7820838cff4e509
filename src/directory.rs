// src/directory.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Directory emulation over a flat key space.
//!
//! A directory is a key prefix ending in the separator that has at least one
//! object under it (a zero-length `dir/` marker counts). [`exists`] classifies
//! a path; [`DirectoryStream`] lists a prefix's immediate children.
//!
//! Filter policy: when the entry filter returns an error, that error is
//! yielded as one `Err` item and iteration continues with the next entry.
//! Backend failures while paging end the listing after being yielded.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::constants::SEPARATOR;
use crate::error::{FsError, Result};
use crate::filesystem::S3FileSystem;
use crate::object_client::{ListPage, ListRequest};
use crate::path::S3Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Absent,
    File,
    Directory,
}

fn list_request(fs: &S3FileSystem, prefix: &str, max_keys: Option<i32>, token: Option<String>) -> ListRequest {
    ListRequest {
        bucket: fs.bucket_name().to_string(),
        prefix: prefix.to_string(),
        delimiter: Some(SEPARATOR.to_string()),
        max_keys,
        continuation_token: token,
    }
}

fn fetch_page(fs: &S3FileSystem, request: ListRequest) -> Result<ListPage> {
    let what = format!("{}/{}", fs.bucket_name(), request.prefix);
    fs.call(&what, move |client| async move { client.list_objects(request).await })
}

/// Classify `path` with at most one listing and one HEAD request.
///
/// The root is always a directory. Otherwise a one-page listing of the
/// path's prefix decides "directory"; failing that, a path written with a
/// trailing separator is absent, and anything else is a file iff its exact
/// key exists.
pub fn exists(path: &S3Path) -> Result<EntryKind> {
    let real = path.to_real_path()?;
    let fs = real.file_system();
    fs.ensure_open()?;
    if real.is_root() {
        return Ok(EntryKind::Directory);
    }

    let prefix = real.directory_prefix();
    let page = fetch_page(fs, list_request(fs, &prefix, Some(1), None))?;
    if !page.is_empty() {
        return Ok(EntryKind::Directory);
    }
    if real.is_directory() {
        return Ok(EntryKind::Absent);
    }

    let key = real.key();
    let bucket = fs.bucket_name().to_string();
    let head = fs.call(&real.to_string(), move |client| async move {
        client.head_object(&bucket, &key).await
    });
    match head {
        Ok(_) => Ok(EntryKind::File),
        Err(e) if e.is_not_found() => Ok(EntryKind::Absent),
        Err(e) => Err(e),
    }
}

/// Per-entry inclusion predicate.
pub type EntryFilter = Box<dyn FnMut(&S3Path) -> Result<bool> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Consumed,
    Closed,
}

/// Single-pass listing of a directory's immediate children.
///
/// [`iter`](Self::iter) may be called once, and only while the stream is
/// open. Closing the stream also stops an iterator already handed out.
pub struct DirectoryStream {
    state: Arc<Mutex<StreamState>>,
    pending: Option<Listing>,
    display: String,
}

impl fmt::Debug for DirectoryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryStream")
            .field("path", &self.display)
            .field("state", &self.state())
            .finish()
    }
}

impl DirectoryStream {
    /// Start listing `dir`. The first page is fetched immediately so that
    /// backend failures surface here rather than on first iteration.
    pub fn open(dir: &S3Path, filter: EntryFilter) -> Result<Self> {
        let real = dir.to_real_path()?;
        let fs = Arc::clone(real.file_system());
        fs.ensure_open()?;
        let prefix = real.directory_prefix();

        let mut listing = Listing {
            fs,
            prefix,
            filter,
            buffered: VecDeque::new(),
            next_token: None,
            exhausted: false,
        };
        listing.fill()?;

        Ok(Self {
            state: Arc::new(Mutex::new(StreamState::Open)),
            pending: Some(listing),
            display: real.to_string(),
        })
    }

    fn state(&self) -> StreamState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn iter(&mut self) -> Result<DirectoryIter> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            StreamState::Closed => {
                Err(FsError::IllegalState(format!("directory stream {} is closed", self.display)))
            }
            StreamState::Consumed => Err(FsError::IllegalState(format!(
                "directory stream {} has already been iterated",
                self.display
            ))),
            StreamState::Open => {
                let listing = self.pending.take().ok_or_else(|| {
                    FsError::IllegalState("directory stream has no pending listing".into())
                })?;
                *state = StreamState::Consumed;
                Ok(DirectoryIter { listing, state: Arc::clone(&self.state) })
            }
        }
    }

    pub fn close(&mut self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = StreamState::Closed;
        self.pending = None;
    }

    pub fn is_open(&self) -> bool {
        self.state() != StreamState::Closed
    }
}

struct Listing {
    fs: Arc<S3FileSystem>,
    prefix: String,
    filter: EntryFilter,
    buffered: VecDeque<String>,
    next_token: Option<String>,
    exhausted: bool,
}

impl Listing {
    fn fill(&mut self) -> Result<()> {
        let page_size = self.fs.config().list_page_size;
        let request = list_request(&self.fs, &self.prefix, page_size, self.next_token.take());
        let page = fetch_page(&self.fs, request).inspect_err(|_| self.exhausted = true)?;
        trace!(
            "Listed {} prefixes and {} keys under '{}'",
            page.common_prefixes.len(),
            page.contents.len(),
            self.prefix
        );
        // Sub-directories first, then files, as the backend pages them.
        self.buffered.extend(page.common_prefixes);
        self.buffered.extend(page.contents.into_iter().map(|o| o.key));
        self.next_token = page.next_continuation_token;
        self.exhausted = self.next_token.is_none();
        Ok(())
    }
}

pub struct DirectoryIter {
    listing: Listing,
    state: Arc<Mutex<StreamState>>,
}

impl Iterator for DirectoryIter {
    type Item = Result<S3Path>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if *self.state.lock().unwrap_or_else(PoisonError::into_inner) == StreamState::Closed {
                return None;
            }
            let listing = &mut self.listing;
            match listing.buffered.pop_front() {
                Some(key) => {
                    // Compared after parsing: `alpha//` collapses to the listed
                    // directory itself, which a tree walk would recurse into forever.
                    let path = S3Path::from_key(Arc::clone(&listing.fs), &key);
                    if path.directory_prefix() == listing.prefix {
                        continue;
                    }
                    match (listing.filter)(&path) {
                        Ok(true) => return Some(Ok(path)),
                        Ok(false) => continue,
                        Err(e) => return Some(Err(e)),
                    }
                }
                None if listing.exhausted => return None,
                None => {
                    if let Err(e) = listing.fill() {
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

/// Accept every entry.
pub fn accept_all() -> EntryFilter {
    Box::new(|_| Ok(true))
}
