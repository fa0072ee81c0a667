//! Admission pipeline for upload, download, list and delete.
//!
//! Every operation runs a fixed sequence of checks, each of which either
//! continues or ends the request with a [`Denial`]:
//!
//! - upload: authenticate, rate limit, file type, size, global quota,
//!   client quota, resolve a fresh path, write
//! - download / list / delete: authenticate, resolve, containment, operate
//!
//! Lower-level faults never escape; they become [`Denial::InternalFault`]
//! (logged at error) or [`Denial::NotFound`].
//!
//! The quota check and the write are not atomic: two concurrent uploads for
//! one client can both pass the check and together overshoot the quota by up
//! to one file each. This is tolerated. A per-client writer lock around
//! check-and-commit would close it.

mod denial;

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::time::Instant;

use tracing::{error, info, warn};

pub use denial::{Denial, DenialCode, InvalidInput};

use crate::config::Config;
use crate::identity::{fingerprint, ClientId, IdentityStore};
use crate::rate_limit::{RateLimitResult, UploadRateLimiter};
use crate::storage::{
    extension_of, has_traversal_markers, sanitize_filename, ClientStorage, PathError,
    QuotaAccountant, QuotaPolicy, SafePath, StoredFile, Usage,
};
use crate::token::TokenStore;

/// Per-upload limits: single-file size and extension allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Maximum size of one file in bytes.
    pub max_file_size: u64,
    /// Lower-case extensions without the leading dot.
    pub allowed_extensions: BTreeSet<String>,
}

impl UploadPolicy {
    /// Whether `filename`'s extension is allowed (case-insensitive).
    pub fn allows(&self, filename: &str) -> bool {
        extension_of(filename).is_some_and(|ext| self.allowed_extensions.contains(&ext))
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub client: ClientId,
    /// Final stored name (may carry a collision suffix).
    pub filename: String,
    pub size_bytes: u64,
    /// Client usage including this file.
    pub usage: Usage,
    pub quota_bytes: u64,
}

/// A file read back for a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub filename: String,
    pub content: Vec<u8>,
}

/// A client's files and usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub client: ClientId,
    /// Newest first.
    pub files: Vec<StoredFile>,
    pub usage: Usage,
    pub quota_bytes: u64,
    /// Bytes the client may still store.
    pub remaining_bytes: u64,
}

/// Result of a successful delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReceipt {
    pub client: ClientId,
    pub filename: String,
    /// Client usage after the delete.
    pub usage: Usage,
    pub quota_bytes: u64,
}

/// Log an unexpected fault and hide it behind [`Denial::InternalFault`].
fn internal_fault(operation: &str, client: &ClientId, err: impl fmt::Display) -> Denial {
    error!(operation, client = %client, error = %err, "Storage fault");
    Denial::InternalFault
}

/// Orchestrates identity, rate limiting, quota and storage.
#[derive(Debug)]
pub struct AdmissionPipeline {
    identity: IdentityStore,
    limiter: UploadRateLimiter,
    storage: ClientStorage,
    quota: QuotaAccountant,
    policy: UploadPolicy,
}

impl AdmissionPipeline {
    /// Assemble a pipeline from its parts.
    pub fn new(
        identity: IdentityStore,
        limiter: UploadRateLimiter,
        storage: ClientStorage,
        quota_policy: QuotaPolicy,
        policy: UploadPolicy,
    ) -> Self {
        let quota = QuotaAccountant::new(storage.root(), quota_policy);
        Self {
            identity,
            limiter,
            storage,
            quota,
            policy,
        }
    }

    /// Build a pipeline from configuration, creating the upload root.
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let identity = IdentityStore::new(TokenStore::new(config.token_file()));
        let limiter = UploadRateLimiter::new(config.rate_limit.limiter_config());
        let storage = ClientStorage::new(config.upload_dir())?;

        Ok(Self::new(
            identity,
            limiter,
            storage,
            config.storage.quota_policy(),
            config.storage.upload_policy(),
        ))
    }

    /// The upload rate limiter.
    pub fn limiter(&self) -> &UploadRateLimiter {
        &self.limiter
    }

    /// The upload limits.
    pub fn upload_policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// The quota limits.
    pub fn quota_policy(&self) -> QuotaPolicy {
        self.quota.policy()
    }

    /// Resolve a credential and make sure the client's directory exists.
    pub fn authenticate(&self, credential: Option<&str>) -> Result<ClientId, Denial> {
        let credential = credential.unwrap_or_default();
        if credential.is_empty() {
            warn!("Request without credential");
            return Err(Denial::Unauthenticated);
        }

        let Some(client) = self.identity.resolve(credential) else {
            warn!(fingerprint = %fingerprint(credential), "Rejected unknown credential");
            return Err(Denial::Unauthenticated);
        };

        self.storage
            .ensure_client_dir(&client)
            .map_err(|e| internal_fault("authenticate", &client, e))?;

        Ok(client)
    }

    /// Admit and store an upload.
    pub fn upload(
        &self,
        credential: Option<&str>,
        requested: &str,
        content: &[u8],
        now: Instant,
    ) -> Result<UploadReceipt, Denial> {
        let client = self.authenticate(credential)?;

        if let RateLimitResult::Denied { retry_after } = self.limiter.admit(&client, now) {
            let config = self.limiter.config();
            warn!(
                client = %client,
                retry_after_secs = retry_after.as_secs(),
                "Upload rate limit exceeded"
            );
            return Err(Denial::RateLimited {
                retry_after,
                limit: config.max_events,
                window: config.window,
            });
        }

        let filename = sanitize_filename(requested).ok_or_else(|| {
            warn!(client = %client, "Upload with empty filename");
            InvalidInput::EmptyName
        })?;
        if has_traversal_markers(requested) {
            warn!(client = %client, requested = %requested, sanitized = %filename, "Stripped path components from upload name");
        }

        if !self.policy.allows(&filename) {
            warn!(client = %client, filename = %filename, "File type not allowed");
            return Err(InvalidInput::DisallowedExtension {
                extension: extension_of(&filename),
                allowed: self.policy.allowed_extensions.iter().cloned().collect(),
            }
            .into());
        }

        let size = content.len() as u64;
        if size > self.policy.max_file_size {
            warn!(client = %client, filename = %filename, size_bytes = size, "File too large");
            return Err(InvalidInput::FileTooLarge {
                size,
                limit: self.policy.max_file_size,
            }
            .into());
        }

        let before = self.quota.admit(&client, size).map_err(|e| {
            warn!(client = %client, overage = e.overage(), reason = %e, "Upload rejected by quota");
            Denial::from(e)
        })?;

        let stored = self
            .storage
            .save_new(&client, &filename, content)
            .map_err(|e| self.path_denial("upload", &client, e))?;

        info!(
            client = %client,
            filename = %stored.filename,
            size_bytes = stored.size,
            "File uploaded"
        );

        Ok(UploadReceipt {
            filename: stored.filename,
            size_bytes: stored.size,
            usage: before.with_file(stored.size),
            quota_bytes: self.quota.policy().client_quota_bytes,
            client,
        })
    }

    /// Read back one of the client's files.
    pub fn download(&self, credential: Option<&str>, requested: &str) -> Result<Download, Denial> {
        let client = self.authenticate(credential)?;
        let safe = self.resolve_existing("download", &client, requested)?;

        let content = self
            .storage
            .load(&safe)
            .map_err(|e| self.io_denial("download", &client, &safe, e))?;

        info!(client = %client, filename = %safe.filename, size_bytes = content.len(), "File downloaded");

        Ok(Download {
            filename: safe.filename,
            content,
        })
    }

    /// List the client's files with current usage.
    pub fn list(&self, credential: Option<&str>) -> Result<Listing, Denial> {
        let client = self.authenticate(credential)?;

        let files = self
            .storage
            .list(&client)
            .map_err(|e| internal_fault("list", &client, e))?;
        let usage = self.quota.usage(&client);

        info!(client = %client, total_files = files.len(), "Files listed");

        Ok(Listing {
            files,
            usage,
            quota_bytes: self.quota.policy().client_quota_bytes,
            remaining_bytes: self.quota.remaining(usage),
            client,
        })
    }

    /// Delete one of the client's files.
    pub fn delete(
        &self,
        credential: Option<&str>,
        requested: &str,
    ) -> Result<DeleteReceipt, Denial> {
        let client = self.authenticate(credential)?;
        let safe = self.resolve_existing("delete", &client, requested)?;

        self.storage
            .delete(&safe)
            .map_err(|e| self.io_denial("delete", &client, &safe, e))?;
        let usage = self.quota.usage(&client);

        info!(client = %client, filename = %safe.filename, "File deleted");

        Ok(DeleteReceipt {
            filename: safe.filename,
            usage,
            quota_bytes: self.quota.policy().client_quota_bytes,
            client,
        })
    }

    fn resolve_existing(
        &self,
        operation: &str,
        client: &ClientId,
        requested: &str,
    ) -> Result<SafePath, Denial> {
        let safe = self
            .storage
            .resolver()
            .resolve(client, requested)
            .map_err(|e| self.path_denial(operation, client, e))?;

        if has_traversal_markers(requested) {
            warn!(
                operation,
                client = %client,
                requested = %requested,
                sanitized = %safe.filename,
                "Stripped path components from requested name"
            );
        }

        Ok(safe)
    }

    fn path_denial(&self, operation: &str, client: &ClientId, err: PathError) -> Denial {
        match err {
            PathError::InvalidName => InvalidInput::EmptyName.into(),
            PathError::Traversal => {
                warn!(operation, client = %client, "Path escapes client directory");
                Denial::ForbiddenPath
            }
            other => internal_fault(operation, client, other),
        }
    }

    fn io_denial(
        &self,
        operation: &str,
        client: &ClientId,
        safe: &SafePath,
        err: io::Error,
    ) -> Denial {
        if err.kind() == io::ErrorKind::NotFound {
            info!(operation, client = %client, filename = %safe.filename, "File not found");
            Denial::NotFound(safe.filename.clone())
        } else {
            internal_fault(operation, client, err)
        }
    }
}
