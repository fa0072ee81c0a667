//! Safe, collision-free paths for client files.
//!
//! Requested names are reduced to a basename built from a small character
//! allow-list before any path is constructed. Every constructed path is then
//! checked independently to lie strictly inside the client's directory,
//! including after symlink resolution when the entry already exists.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::identity::ClientId;

/// Stem used when nothing usable survives sanitization but an extension does.
pub const PLACEHOLDER_STEM: &str = "file";

/// Maximum length of a sanitized filename, leaving room for a collision suffix.
pub const MAX_FILENAME_LENGTH: usize = 200;

/// Longest suffix treated as an extension.
pub const MAX_EXTENSION_LENGTH: usize = 16;

/// Highest numeric suffix tried before giving up on a name.
pub const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Path resolution failures.
#[derive(Debug, Error)]
pub enum PathError {
    /// Nothing usable is left of the requested name.
    #[error("filename is empty after sanitization")]
    InvalidName,
    /// The resolved path is not strictly inside the client directory.
    #[error("path escapes the client directory")]
    Traversal,
    /// Every suffixed variant of the name is taken.
    #[error("no free filename derived from {0}")]
    Exhausted(String),
    /// Filesystem failure while probing or creating.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-')
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Reduce a requested name to a safe basename.
///
/// Keeps the last path component only, drops every character outside
/// `[A-Za-z0-9 ._-]` and trims dots and spaces from the ends of the stem.
/// A name whose stem vanishes but whose extension survives gets
/// [`PLACEHOLDER_STEM`]. Returns `None` when nothing usable remains.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(is_separator).next().unwrap_or_default();
    let filtered: String = base.chars().filter(|&c| is_allowed_char(c)).collect();

    let (stem, ext) = match filtered.rsplit_once('.') {
        Some((stem, ext))
            if !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LENGTH
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (stem, Some(ext))
        }
        _ => (filtered.as_str(), None),
    };

    let stem = stem.trim_matches(|c| c == '.' || c == ' ');

    let name = match ext {
        Some(ext) => {
            let stem = if stem.is_empty() { PLACEHOLDER_STEM } else { stem };
            let budget = MAX_FILENAME_LENGTH - ext.len() - 1;
            let stem = stem[..stem.len().min(budget)].trim_end_matches(|c| c == '.' || c == ' ');
            format!("{stem}.{ext}")
        }
        None => {
            let stem = stem[..stem.len().min(MAX_FILENAME_LENGTH)].trim_end_matches(|c| c == '.' || c == ' ');
            if stem.is_empty() {
                return None;
            }
            stem.to_string()
        }
    };

    Some(name)
}

/// Lower-cased extension of a filename, if it has a non-empty stem and suffix.
pub fn extension_of(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Whether a raw requested name carries separators or parent references.
pub fn has_traversal_markers(raw: &str) -> bool {
    raw.contains(is_separator) || raw.split(is_separator).any(|part| part.trim() == "..")
}

/// `name_N.ext` (or `name_N` without an extension).
fn suffixed_name(filename: &str, n: u32) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{n}.{ext}"),
        _ => format!("{filename}_{n}"),
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Verify that `candidate` lies strictly inside `root`.
///
/// The check runs lexically first and, when the entry exists, again on the
/// canonical path so a symlink cannot point outside the root.
pub fn ensure_contained(root: &Path, candidate: &Path) -> Result<PathBuf, PathError> {
    let root = normalize_lexically(root);
    let normalized = normalize_lexically(candidate);

    if normalized == root || !normalized.starts_with(&root) {
        return Err(PathError::Traversal);
    }

    if fs::symlink_metadata(&normalized).is_ok() {
        let real_root = fs::canonicalize(&root).unwrap_or_else(|_| root.clone());
        let real = fs::canonicalize(&normalized).map_err(|_| PathError::Traversal)?;
        if real == real_root || !real.starts_with(&real_root) {
            return Err(PathError::Traversal);
        }
    }

    Ok(normalized)
}

/// A contained path and the filename it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafePath {
    /// Absolute path inside the client directory.
    pub path: PathBuf,
    /// Sanitized filename (last component of `path`).
    pub filename: String,
}

/// Maps (client, requested name) to paths under the storage root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Create a resolver for the storage tree at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The client's private directory.
    pub fn client_root(&self, client: &ClientId) -> PathBuf {
        self.root.join(client.as_str())
    }

    /// Resolve a name for lookup of an existing file (no collision handling).
    pub fn resolve(&self, client: &ClientId, requested: &str) -> Result<SafePath, PathError> {
        let filename = sanitize_filename(requested).ok_or(PathError::InvalidName)?;
        let client_root = self.client_root(client);
        let path = ensure_contained(&client_root, &client_root.join(&filename))?;
        Ok(SafePath { path, filename })
    }

    /// Resolve a name for a new file and create it exclusively.
    ///
    /// When the sanitized name is taken, `name_1.ext`, `name_2.ext`, ... are
    /// tried in turn. Creation uses `create_new`, so two concurrent uploads
    /// of one name end up in two files and nothing is ever overwritten.
    pub fn create_unique(
        &self,
        client: &ClientId,
        requested: &str,
    ) -> Result<(SafePath, File), PathError> {
        let base = sanitize_filename(requested).ok_or(PathError::InvalidName)?;
        let client_root = self.client_root(client);

        for attempt in 0..=MAX_COLLISION_SUFFIX {
            let filename = if attempt == 0 {
                base.clone()
            } else {
                suffixed_name(&base, attempt)
            };
            let path = ensure_contained(&client_root, &client_root.join(&filename))?;

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((SafePath { path, filename }, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(PathError::Exhausted(base))
    }
}
