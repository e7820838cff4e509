// src/attributes.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Basic file attributes projected from HEAD metadata.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::constants::BASIC_ATTRIBUTE_VIEW;
use crate::error::{FsError, Result};
use crate::object_client::ObjectMetadata;

pub const CREATION_TIME: &str = "creationTime";
pub const FILE_KEY: &str = "fileKey";
pub const IS_DIRECTORY: &str = "isDirectory";
pub const IS_OTHER: &str = "isOther";
pub const IS_REGULAR_FILE: &str = "isRegularFile";
pub const IS_SYMBOLIC_LINK: &str = "isSymbolicLink";
pub const LAST_ACCESS_TIME: &str = "lastAccessTime";
pub const LAST_MODIFIED_TIME: &str = "lastModifiedTime";
pub const SIZE: &str = "size";

pub const ALL_ATTRIBUTES: [&str; 9] = [
    CREATION_TIME,
    FILE_KEY,
    IS_DIRECTORY,
    IS_OTHER,
    IS_REGULAR_FILE,
    IS_SYMBOLIC_LINK,
    LAST_ACCESS_TIME,
    LAST_MODIFIED_TIME,
    SIZE,
];

/// Read-only basic attributes.
///
/// The backend keeps one timestamp per object, so last-access and creation
/// time both equal last-modified. Inferred directories carry the epoch, size
/// zero and no entity tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAttributes {
    last_modified: DateTime<Utc>,
    size: u64,
    directory: bool,
    e_tag: Option<String>,
}

impl BasicAttributes {
    pub fn directory() -> Self {
        Self { last_modified: DateTime::UNIX_EPOCH, size: 0, directory: true, e_tag: None }
    }

    /// Attributes of the regular file at `path`. Size, entity tag and
    /// last-modified must all be present.
    pub fn from_metadata(path: &str, metadata: &ObjectMetadata) -> Result<Self> {
        let missing = |what: &str| FsError::InvalidMetadata {
            path: path.to_string(),
            reason: format!("response has no {what}"),
        };
        let size = metadata.content_length.ok_or_else(|| missing("content length"))?;
        let e_tag = metadata.e_tag.clone().ok_or_else(|| missing("entity tag"))?;
        let last_modified = metadata.last_modified.ok_or_else(|| missing("last-modified time"))?;
        Ok(Self { last_modified, size, directory: false, e_tag: Some(e_tag) })
    }

    pub fn last_modified_time(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn last_access_time(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_regular_file(&self) -> bool {
        !self.directory
    }

    pub fn is_directory(&self) -> bool {
        self.directory
    }

    pub fn is_symbolic_link(&self) -> bool {
        false
    }

    pub fn is_other(&self) -> bool {
        false
    }

    /// The entity tag; absent for directories.
    pub fn file_key(&self) -> Option<&str> {
        self.e_tag.as_deref()
    }

    pub fn value(&self, name: &str) -> Option<AttributeValue> {
        let v = match name {
            CREATION_TIME => AttributeValue::Time(self.creation_time()),
            FILE_KEY => AttributeValue::Text(self.e_tag.clone()),
            IS_DIRECTORY => AttributeValue::Bool(self.is_directory()),
            IS_OTHER => AttributeValue::Bool(self.is_other()),
            IS_REGULAR_FILE => AttributeValue::Bool(self.is_regular_file()),
            IS_SYMBOLIC_LINK => AttributeValue::Bool(self.is_symbolic_link()),
            LAST_ACCESS_TIME => AttributeValue::Time(self.last_access_time()),
            LAST_MODIFIED_TIME => AttributeValue::Time(self.last_modified_time()),
            SIZE => AttributeValue::Size(self.size),
            _ => return None,
        };
        Some(v)
    }

    /// Project the attributes named in `request` (comma separated, see
    /// [`parse_attribute_names`]).
    pub fn to_map(&self, request: &str) -> Result<BTreeMap<String, AttributeValue>> {
        let names = parse_attribute_names(request)?;
        Ok(names
            .into_iter()
            .filter_map(|n| self.value(n).map(|v| (n.to_string(), v)))
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Time(DateTime<Utc>),
    Bool(bool),
    Size(u64),
    Text(Option<String>),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Time(t) => write!(f, "{}", t.to_rfc3339()),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Size(s) => write!(f, "{s}"),
            AttributeValue::Text(Some(s)) => f.write_str(s),
            AttributeValue::Text(None) => f.write_str("null"),
        }
    }
}

/// Resolve a comma-separated attribute request into known names.
///
/// `*` or `basic` select every attribute, names may carry a `basic:`
/// prefix, and an empty request selects nothing. Other views are
/// unsupported; unknown names are invalid.
pub fn parse_attribute_names(request: &str) -> Result<Vec<&'static str>> {
    let mut out: Vec<&'static str> = Vec::new();
    for raw in request.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let name = match raw.split_once(':') {
            Some((view, name)) if view == BASIC_ATTRIBUTE_VIEW => name,
            Some((view, _)) => {
                return Err(FsError::UnsupportedOperation(format!("attribute view '{view}'")));
            }
            None => raw,
        };
        if name == "*" || name == BASIC_ATTRIBUTE_VIEW {
            return Ok(ALL_ATTRIBUTES.to_vec());
        }
        let known = ALL_ATTRIBUTES
            .iter()
            .copied()
            .find(|a| *a == name)
            .ok_or_else(|| FsError::InvalidArgument(format!("unknown attribute '{name}'")))?;
        if !out.contains(&known) {
            out.push(known);
        }
    }
    Ok(out)
}
