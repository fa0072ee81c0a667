//! Client storage: path safety, quota accounting and file operations.

pub mod path;
pub mod quota;
mod store;

pub use path::{
    extension_of, has_traversal_markers, sanitize_filename, PathError, PathResolver, SafePath,
};
pub use quota::{measure, QuotaAccountant, QuotaExceeded, QuotaPolicy, Usage};
pub use store::{ClientStorage, StoredFile};
