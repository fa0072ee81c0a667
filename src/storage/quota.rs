//! Storage accounting and quota admission.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

use crate::identity::ClientId;

/// Bytes and regular-file count under a directory tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub bytes: u64,
    pub files: u64,
}

impl Usage {
    /// Usage after adding one file of `size` bytes.
    pub fn with_file(self, size: u64) -> Self {
        Self {
            bytes: self.bytes.saturating_add(size),
            files: self.files.saturating_add(1),
        }
    }
}

/// Sum sizes of all regular files under `root`, recursively.
///
/// Symlinks are not followed. Entries that cannot be read are skipped with a
/// warning, and a missing root counts as empty.
pub fn measure(root: &Path) -> Usage {
    let mut usage = Usage::default();

    for entry in WalkDir::new(root).follow_links(false) {
        match entry {
            Ok(entry) if entry.file_type().is_file() => match entry.metadata() {
                Ok(meta) => usage = usage.with_file(meta.len()),
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Skipping unreadable file"),
            },
            Ok(_) => {}
            Err(e) => {
                let missing_root = e.depth() == 0
                    && e.io_error()
                        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound);
                if !missing_root {
                    warn!(
                        path = ?e.path(),
                        error = %e,
                        "Skipping unreadable entry during usage scan"
                    );
                }
            }
        }
    }

    usage
}

/// Storage limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    /// Per-client byte limit.
    pub client_quota_bytes: u64,
    /// Limit for the whole storage tree, if any.
    pub global_quota_bytes: Option<u64>,
    /// Per-client file count limit.
    pub max_file_count: u64,
}

/// Which limit an upload would break.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaExceeded {
    /// The shared storage tree is full.
    #[error("shared storage is full ({used} of {limit} bytes used, {incoming} requested)")]
    Global { used: u64, limit: u64, incoming: u64 },
    /// The client's byte quota would be exceeded.
    #[error("storage quota exceeded ({used} of {limit} bytes used, {incoming} requested)")]
    ClientBytes { used: u64, limit: u64, incoming: u64 },
    /// The client already holds the maximum number of files.
    #[error("file limit reached ({count} of {limit} files)")]
    ClientFiles { count: u64, limit: u64 },
}

impl QuotaExceeded {
    /// How far past the limit the upload would land.
    pub fn overage(&self) -> u64 {
        match *self {
            QuotaExceeded::Global {
                used,
                limit,
                incoming,
            }
            | QuotaExceeded::ClientBytes {
                used,
                limit,
                incoming,
            } => used.saturating_add(incoming).saturating_sub(limit),
            QuotaExceeded::ClientFiles { count, limit } => {
                count.saturating_add(1).saturating_sub(limit)
            }
        }
    }

    /// Whether the denial concerns the shared tree rather than one client.
    pub fn is_global(&self) -> bool {
        matches!(self, QuotaExceeded::Global { .. })
    }
}

/// Measures usage under the storage root and admits uploads against a
/// [`QuotaPolicy`].
///
/// Usage is always computed from what is on disk, never cached.
#[derive(Debug, Clone)]
pub struct QuotaAccountant {
    root: PathBuf,
    policy: QuotaPolicy,
}

impl QuotaAccountant {
    /// Create an accountant for the storage tree at `root`.
    pub fn new(root: impl Into<PathBuf>, policy: QuotaPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    /// The active limits.
    pub fn policy(&self) -> QuotaPolicy {
        self.policy
    }

    /// Current usage of one client.
    pub fn usage(&self, client: &ClientId) -> Usage {
        measure(&self.root.join(client.as_str()))
    }

    /// Current usage of the whole storage tree.
    pub fn global_usage(&self) -> Usage {
        measure(&self.root)
    }

    /// Bytes the client may still store.
    pub fn remaining(&self, usage: Usage) -> u64 {
        self.policy.client_quota_bytes.saturating_sub(usage.bytes)
    }

    /// Decide whether `client` may store `incoming` more bytes.
    ///
    /// Checks the global limit first, then the client's bytes, then its file
    /// count. A file landing exactly on a limit is admitted. Returns the
    /// client's usage before the upload.
    pub fn admit(&self, client: &ClientId, incoming: u64) -> Result<Usage, QuotaExceeded> {
        if let Some(limit) = self.policy.global_quota_bytes {
            let used = self.global_usage().bytes;
            if used.saturating_add(incoming) > limit {
                return Err(QuotaExceeded::Global {
                    used,
                    limit,
                    incoming,
                });
            }
        }

        let usage = self.usage(client);

        if usage.bytes.saturating_add(incoming) > self.policy.client_quota_bytes {
            return Err(QuotaExceeded::ClientBytes {
                used: usage.bytes,
                limit: self.policy.client_quota_bytes,
                incoming,
            });
        }

        if usage.files >= self.policy.max_file_count {
            return Err(QuotaExceeded::ClientFiles {
                count: usage.files,
                limit: self.policy.max_file_count,
            });
        }

        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn policy(client: u64, global: Option<u64>, files: u64) -> QuotaPolicy {
        QuotaPolicy {
            client_quota_bytes: client,
            global_quota_bytes: global,
            max_file_count: files,
        }
    }

    fn alice() -> ClientId {
        ClientId::parse("alice").unwrap()
    }

    fn write(root: &Path, rel: &str, size: usize) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![b'x'; size]).unwrap();
    }

    #[test]
    fn test_measure_missing_root_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(measure(&temp_dir.path().join("nope")), Usage::default());
    }

    #[test]
    fn test_measure_counts_nested_files() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "a.txt", 10);
        write(temp_dir.path(), "sub/b.txt", 20);
        write(temp_dir.path(), "sub/deeper/c.txt", 5);

        assert_eq!(
            measure(temp_dir.path()),
            Usage {
                bytes: 35,
                files: 3
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_measure_does_not_follow_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        write(outside.path(), "big.bin", 1000);
        write(temp_dir.path(), "a.txt", 10);
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("link")).unwrap();

        assert_eq!(measure(temp_dir.path()).bytes, 10);
    }

    #[cfg(unix)]
    #[test]
    fn test_measure_skips_unreadable_subtree() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "a.txt", 10);
        write(temp_dir.path(), "locked/hidden.txt", 100);
        write(temp_dir.path(), "open/b.txt", 5);

        let locked = temp_dir.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Permissions are not enforced for root
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let usage = measure(temp_dir.path());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(usage, Usage { bytes: 15, files: 2 });
    }

    #[test]
    fn test_admit_within_quota() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "alice/a.txt", 40);
        let accountant = QuotaAccountant::new(temp_dir.path(), policy(100, None, 10));

        let usage = accountant.admit(&alice(), 60).unwrap();
        assert_eq!(usage.bytes, 40);
        assert_eq!(accountant.remaining(usage), 60);
    }

    #[test]
    fn test_admit_exceeds_client_bytes() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "alice/a.txt", 40);
        let accountant = QuotaAccountant::new(temp_dir.path(), policy(100, None, 10));

        let err = accountant.admit(&alice(), 61).unwrap_err();
        assert_eq!(
            err,
            QuotaExceeded::ClientBytes {
                used: 40,
                limit: 100,
                incoming: 61
            }
        );
        assert_eq!(err.overage(), 1);
        assert!(!err.is_global());
    }

    #[test]
    fn test_admit_file_count_limit() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "alice/a.txt", 1);
        write(temp_dir.path(), "alice/b.txt", 1);
        let accountant = QuotaAccountant::new(temp_dir.path(), policy(100, None, 2));

        let err = accountant.admit(&alice(), 1).unwrap_err();
        assert_eq!(err, QuotaExceeded::ClientFiles { count: 2, limit: 2 });
        assert_eq!(err.overage(), 1);
    }

    #[test]
    fn test_admit_global_limit_checked_first() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "bob/a.txt", 90);
        let accountant = QuotaAccountant::new(temp_dir.path(), policy(1000, Some(100), 10));

        let err = accountant.admit(&alice(), 20).unwrap_err();
        assert!(err.is_global());
        assert_eq!(err.overage(), 10);

        assert!(accountant.admit(&alice(), 10).is_ok());
    }

    #[test]
    fn test_usage_is_per_client() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "alice/a.txt", 10);
        write(temp_dir.path(), "bob/b.txt", 20);
        let accountant = QuotaAccountant::new(temp_dir.path(), policy(100, None, 10));

        assert_eq!(accountant.usage(&alice()).bytes, 10);
        assert_eq!(accountant.global_usage().bytes, 30);
    }
}
