//! Typed reasons an operation was refused.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::storage::QuotaExceeded;

/// Why a request's input was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidInput {
    /// Nothing usable is left of the requested filename.
    #[error("no file selected or filename is empty")]
    EmptyName,
    /// The upload carried no file part.
    #[error("no file provided")]
    MissingFile,
    /// Extension not on the allow-list.
    #[error("file type not allowed (allowed: {})", allowed.join(", "))]
    DisallowedExtension {
        extension: Option<String>,
        allowed: Vec<String>,
    },
    /// Larger than the single-file limit.
    #[error("file too large ({size} bytes, limit {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },
}

/// Terminal denial of an admission pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("missing or invalid credential")]
    Unauthenticated,
    #[error("upload rate limit exceeded ({limit} uploads per {}s)", window.as_secs())]
    RateLimited {
        retry_after: Duration,
        limit: u32,
        window: Duration,
    },
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("access denied")]
    ForbiddenPath,
    #[error("internal storage error")]
    InternalFault,
}

/// Machine-readable denial code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialCode {
    Unauthenticated,
    RateLimited,
    InvalidInput,
    FileTooLarge,
    QuotaExceeded,
    GlobalQuotaExceeded,
    NotFound,
    ForbiddenPath,
    InternalFault,
}

impl DenialCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DenialCode::Unauthenticated => "UNAUTHENTICATED",
            DenialCode::RateLimited => "RATE_LIMITED",
            DenialCode::InvalidInput => "INVALID_INPUT",
            DenialCode::FileTooLarge => "FILE_TOO_LARGE",
            DenialCode::QuotaExceeded => "QUOTA_EXCEEDED",
            DenialCode::GlobalQuotaExceeded => "GLOBAL_QUOTA_EXCEEDED",
            DenialCode::NotFound => "NOT_FOUND",
            DenialCode::ForbiddenPath => "FORBIDDEN_PATH",
            DenialCode::InternalFault => "INTERNAL_FAULT",
        }
    }
}

impl fmt::Display for DenialCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Denial {
    /// The machine-readable code for this denial.
    pub fn code(&self) -> DenialCode {
        match self {
            Denial::Unauthenticated => DenialCode::Unauthenticated,
            Denial::RateLimited { .. } => DenialCode::RateLimited,
            Denial::InvalidInput(InvalidInput::FileTooLarge { .. }) => DenialCode::FileTooLarge,
            Denial::InvalidInput(_) => DenialCode::InvalidInput,
            Denial::QuotaExceeded(q) if q.is_global() => DenialCode::GlobalQuotaExceeded,
            Denial::QuotaExceeded(_) => DenialCode::QuotaExceeded,
            Denial::NotFound(_) => DenialCode::NotFound,
            Denial::ForbiddenPath => DenialCode::ForbiddenPath,
            Denial::InternalFault => DenialCode::InternalFault,
        }
    }

    /// Whether this is an unexpected fault rather than ordinary traffic.
    pub fn is_fault(&self) -> bool {
        matches!(self, Denial::InternalFault)
    }
}
