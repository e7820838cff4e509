// src/options.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Open, copy and access option vocabularies, plus the validation rules for
// combining them.

use crate::error::{FsError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOption {
    /// Declared byte length; selects the streaming upload strategy.
    ContentLength(u64),
    ContentType(String),
    Read,
    Write,
    Create,
    CreateNew,
    TruncateExisting,
    Append,
    Sync,
    Dsync,
    DeleteOnClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOption {
    ReplaceExisting,
    AtomicMove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
}

/// What must be true about the target before a write starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    /// `Create`: created or replaced.
    Any,
    /// `CreateNew`: must not exist (checked, then enforced by a conditional put).
    MustNotExist,
    /// Neither create option: must already exist.
    MustExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub existence: Existence,
    pub delete_on_close: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub delete_on_close: bool,
}

fn content_metadata(options: &[OpenOption]) -> (Option<u64>, Option<String>) {
    let length = options.iter().find_map(|o| match o {
        OpenOption::ContentLength(n) => Some(*n),
        _ => None,
    });
    let content_type = options.iter().find_map(|o| match o {
        OpenOption::ContentType(t) => Some(t.clone()),
        _ => None,
    });
    (length, content_type)
}

impl WriteOptions {
    /// Validate options for opening a writer.
    ///
    /// With no mode options the default is `Create + TruncateExisting + Write`.
    /// Otherwise `Write` is required, and so is `TruncateExisting` unless
    /// `CreateNew` is given. Append and the sync family are unsupported.
    pub fn from_options(options: &[OpenOption]) -> Result<Self> {
        let has = |o: &OpenOption| options.contains(o);

        for (option, name) in [
            (OpenOption::Append, "APPEND"),
            (OpenOption::Sync, "SYNC"),
            (OpenOption::Dsync, "DSYNC"),
            (OpenOption::Read, "READ on a writer"),
        ] {
            if has(&option) {
                return Err(FsError::UnsupportedOperation(format!("open option {name}")));
            }
        }

        let explicit_mode = options.iter().any(|o| {
            matches!(
                o,
                OpenOption::Write
                    | OpenOption::Create
                    | OpenOption::CreateNew
                    | OpenOption::TruncateExisting
            )
        });

        let existence = if !explicit_mode {
            Existence::Any
        } else {
            if !has(&OpenOption::Write) {
                return Err(FsError::InvalidArgument("WRITE option is required".into()));
            }
            if has(&OpenOption::CreateNew) {
                Existence::MustNotExist
            } else {
                if !has(&OpenOption::TruncateExisting) {
                    return Err(FsError::UnsupportedOperation(
                        "objects are replaced whole; TRUNCATE_EXISTING is required".into(),
                    ));
                }
                if has(&OpenOption::Create) { Existence::Any } else { Existence::MustExist }
            }
        };

        let (content_length, content_type) = content_metadata(options);
        Ok(Self {
            content_length,
            content_type,
            existence,
            delete_on_close: has(&OpenOption::DeleteOnClose),
        })
    }
}

impl ReadOptions {
    pub fn from_options(options: &[OpenOption]) -> Result<Self> {
        for o in options {
            match o {
                OpenOption::Read | OpenOption::DeleteOnClose => {}
                OpenOption::Write | OpenOption::Append => {
                    return Err(FsError::UnsupportedOperation(format!(
                        "open option {o:?} on a reader"
                    )));
                }
                other => {
                    return Err(FsError::InvalidArgument(format!(
                        "open option {other:?} does not apply to a reader"
                    )));
                }
            }
        }
        Ok(Self { delete_on_close: options.contains(&OpenOption::DeleteOnClose) })
    }
}
