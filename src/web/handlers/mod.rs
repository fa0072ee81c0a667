//! API handlers.

pub mod files;
pub mod health;

pub use files::*;
pub use health::*;

use std::sync::Arc;

use crate::admission::AdmissionPipeline;

/// Multipart framing allowance on top of the single-file limit.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub pipeline: Arc<AdmissionPipeline>,
    /// Version reported by the health endpoint.
    pub version: &'static str,
}

impl AppState {
    /// Create a new application state.
    pub fn new(pipeline: AdmissionPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Request body limit for uploads.
    pub fn body_limit(&self) -> usize {
        let max_file_size = self.pipeline.upload_policy().max_file_size;
        usize::try_from(max_file_size)
            .unwrap_or(usize::MAX)
            .saturating_add(MULTIPART_OVERHEAD)
    }
}
