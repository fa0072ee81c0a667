//! coursedrop - authenticated course file drop box.
//!
//! Students upload files over HTTP with a bearer credential. Each client gets
//! an isolated directory under the upload root, guarded by an admission
//! pipeline: credential check, upload rate limit, file type and size checks,
//! per-client and course-wide quotas, and traversal-proof, collision-free
//! paths.

pub mod admission;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod rate_limit;
pub mod storage;
pub mod token;
pub mod web;

pub use admission::{
    AdmissionPipeline, DeleteReceipt, Denial, DenialCode, Download, InvalidInput, Listing,
    UploadPolicy, UploadReceipt,
};
pub use config::Config;
pub use error::{CourseDropError, Result};
pub use identity::{ClientId, ClientIdError, CredentialSource, IdentityStore};
pub use rate_limit::{RateLimitConfig, RateLimitResult, UploadRateLimiter};
pub use storage::{
    ClientStorage, PathResolver, QuotaAccountant, QuotaExceeded, QuotaPolicy, StoredFile, Usage,
};
pub use token::{TokenMap, TokenStore};
pub use web::WebServer;
