//! Per-client file storage.
//!
//! Files are stored flat under one directory per client:
//! ```text
//! {root}/
//! ├── alice/
//! │   ├── notes.txt
//! │   └── notes_1.txt
//! └── bob42/
//!     └── hw1.java
//! ```

use std::fs::{self, File, Metadata};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::warn;

use super::path::{PathError, PathResolver, SafePath};
use crate::identity::ClientId;

/// A file held for a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub filename: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

impl StoredFile {
    fn from_metadata(filename: String, meta: &Metadata) -> Self {
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Self {
            filename,
            size: meta.len(),
            modified,
        }
    }
}

/// File storage rooted at the upload directory.
#[derive(Debug, Clone)]
pub struct ClientStorage {
    /// Canonical storage root.
    root: PathBuf,
    resolver: PathResolver,
}

impl ClientStorage {
    /// Open the storage tree at `root`, creating it if needed.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        let root = fs::canonicalize(root.as_ref())?;
        Ok(Self {
            resolver: PathResolver::new(root.clone()),
            root,
        })
    }

    /// The canonical storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path resolver for this tree.
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Create the client's directory if it does not exist yet.
    pub fn ensure_client_dir(&self, client: &ClientId) -> io::Result<PathBuf> {
        let dir = self.resolver.client_root(client);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Store `content` under a fresh name derived from `requested`.
    ///
    /// A partially written file is removed on failure.
    pub fn save_new(
        &self,
        client: &ClientId,
        requested: &str,
        content: &[u8],
    ) -> Result<StoredFile, PathError> {
        let (safe, mut file) = self.resolver.create_unique(client, requested)?;

        if let Err(e) = write_all_synced(&mut file, content) {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&safe.path) {
                warn!(path = %safe.path.display(), error = %cleanup, "Failed to remove partial upload");
            }
            return Err(e.into());
        }

        let meta = file.metadata()?;
        Ok(StoredFile::from_metadata(safe.filename, &meta))
    }

    /// Read a stored file.
    pub fn load(&self, safe: &SafePath) -> io::Result<Vec<u8>> {
        if !fs::metadata(&safe.path)?.is_file() {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        fs::read(&safe.path)
    }

    /// Delete a stored file.
    pub fn delete(&self, safe: &SafePath) -> io::Result<()> {
        if !fs::metadata(&safe.path)?.is_file() {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        fs::remove_file(&safe.path)
    }

    /// Regular files directly in the client's directory, newest first.
    ///
    /// A client with no directory yet has no files.
    pub fn list(&self, client: &ClientId) -> io::Result<Vec<StoredFile>> {
        let dir = self.resolver.client_root(client);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match entry.metadata() {
                Ok(meta) => files.push(StoredFile::from_metadata(filename, &meta)),
                Err(e) => warn!(file = %filename, error = %e, "Skipping unreadable file"),
            }
        }

        files.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(files)
    }
}

fn write_all_synced(file: &mut File, content: &[u8]) -> io::Result<()> {
    file.write_all(content)?;
    file.sync_all()
}
