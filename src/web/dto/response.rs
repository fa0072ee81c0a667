//! Response DTOs for Web API.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::admission::{DeleteReceipt, Listing, UploadReceipt};
use crate::config::BYTES_PER_MB;
use crate::storage::StoredFile;

/// Bytes as megabytes, rounded to two decimals.
pub fn to_mb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_MB as f64 * 100.0).round() / 100.0
}

fn to_rfc3339(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// POST /api/upload response.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    /// Stored name; differs from the request when a suffix was added.
    pub filename: String,
    pub size_bytes: u64,
    pub current_usage_bytes: u64,
    pub current_usage_mb: f64,
    pub quota_mb: f64,
}

impl From<UploadReceipt> for UploadResponse {
    fn from(receipt: UploadReceipt) -> Self {
        Self {
            message: "File uploaded successfully".to_string(),
            filename: receipt.filename,
            size_bytes: receipt.size_bytes,
            current_usage_bytes: receipt.usage.bytes,
            current_usage_mb: to_mb(receipt.usage.bytes),
            quota_mb: to_mb(receipt.quota_bytes),
        }
    }
}

/// One entry of a file listing.
#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub filename: String,
    pub size_bytes: u64,
    /// RFC 3339 modification time.
    pub modified: String,
}

impl From<StoredFile> for FileEntry {
    fn from(file: StoredFile) -> Self {
        Self {
            modified: to_rfc3339(&file.modified),
            filename: file.filename,
            size_bytes: file.size,
        }
    }
}

/// GET /api/list response.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    /// Newest first.
    pub files: Vec<FileEntry>,
    pub total_files: usize,
    pub total_usage_bytes: u64,
    pub total_usage_mb: f64,
    pub quota_mb: f64,
    pub remaining_mb: f64,
}

impl From<Listing> for ListResponse {
    fn from(listing: Listing) -> Self {
        let remaining = listing.remaining_bytes;
        let files: Vec<FileEntry> = listing.files.into_iter().map(FileEntry::from).collect();
        Self {
            total_files: files.len(),
            files,
            total_usage_bytes: listing.usage.bytes,
            total_usage_mb: to_mb(listing.usage.bytes),
            quota_mb: to_mb(listing.quota_bytes),
            remaining_mb: to_mb(remaining),
        }
    }
}

/// DELETE /api/delete/:filename response.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    pub filename: String,
    pub current_usage_mb: f64,
    pub quota_mb: f64,
}

impl From<DeleteReceipt> for DeleteResponse {
    fn from(receipt: DeleteReceipt) -> Self {
        Self {
            message: "File deleted successfully".to_string(),
            filename: receipt.filename,
            current_usage_mb: to_mb(receipt.usage.bytes),
            quota_mb: to_mb(receipt.quota_bytes),
        }
    }
}

/// GET /api/health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub version: &'static str,
}

impl HealthResponse {
    /// A healthy status stamped with the current time.
    pub fn healthy(version: &'static str) -> Self {
        Self {
            status: "healthy",
            timestamp: to_rfc3339(&Utc::now()),
            version,
        }
    }
}
