//! Configuration module for coursedrop.
//!
//! One configuration surface, injected once at startup: a TOML file with
//! per-field defaults, optionally overridden by `COURSEDROP_*` environment
//! variables.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::admission::UploadPolicy;
use crate::rate_limit::RateLimitConfig;
use crate::storage::QuotaPolicy;
use crate::{CourseDropError, Result};

/// Bytes per megabyte as used by every `*_mb` setting.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Largest `*_mb` setting whose byte count fits in a `u64`.
pub const MAX_SIZE_MB: u64 = u64::MAX / BYTES_PER_MB;

/// Megabytes to bytes, saturating at `u64::MAX`.
fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(BYTES_PER_MB)
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origins.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Per-IP request budget at the HTTP edge (requests per minute).
    #[serde(default = "default_api_rate_limit")]
    pub api_rate_limit: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_api_rate_limit() -> u32 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
            api_rate_limit: default_api_rate_limit(),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Root of the per-client storage tree.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    /// JSON credential store (client id -> token).
    #[serde(default = "default_token_file")]
    pub token_file: String,
}

fn default_upload_dir() -> String {
    "data/uploads".to_string()
}

fn default_token_file() -> String {
    "data/tokens/tokens.json".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            token_file: default_token_file(),
        }
    }
}

/// Storage limits.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Maximum size of a single upload in megabytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size_mb: u64,
    /// Per-client storage quota in megabytes.
    #[serde(default = "default_client_quota")]
    pub client_quota_mb: u64,
    /// Course-wide storage ceiling in megabytes (0 = unlimited).
    #[serde(default)]
    pub global_quota_mb: u64,
    /// Maximum number of files a client may hold.
    #[serde(default = "default_max_file_count")]
    pub max_file_count: u64,
    /// Allowed file extensions, case-insensitive.
    ///
    /// Accepts either a TOML array or a comma-separated string.
    #[serde(
        default = "default_allowed_extensions",
        deserialize_with = "deserialize_extensions"
    )]
    pub allowed_extensions: Vec<String>,
}

fn default_max_file_size() -> u64 {
    50
}

fn default_client_quota() -> u64 {
    500
}

fn default_max_file_count() -> u64 {
    1000
}

fn default_allowed_extensions() -> Vec<String> {
    [
        "txt", "pdf", "zip", "java", "kt", "xml", "json", "png", "jpg", "jpeg", "apk", "gradle",
        "md",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExtensionList {
    List(Vec<String>),
    Csv(String),
}

fn deserialize_extensions<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let list = match ExtensionList::deserialize(deserializer)? {
        ExtensionList::List(list) => list,
        ExtensionList::Csv(csv) => csv.split(',').map(str::to_string).collect(),
    };
    Ok(list)
}

/// Normalize an extension for comparison: trimmed, lower-case, no leading dot.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

impl StorageConfig {
    /// Per-client and global ceilings in bytes.
    pub fn quota_policy(&self) -> QuotaPolicy {
        QuotaPolicy {
            client_quota_bytes: mb_to_bytes(self.client_quota_mb),
            global_quota_bytes: (self.global_quota_mb > 0)
                .then(|| mb_to_bytes(self.global_quota_mb)),
            max_file_count: self.max_file_count,
        }
    }

    /// Single-file limit and extension allow-list.
    pub fn upload_policy(&self) -> UploadPolicy {
        let allowed_extensions: BTreeSet<String> = self
            .allowed_extensions
            .iter()
            .map(|e| normalize_extension(e))
            .filter(|e| !e.is_empty())
            .collect();

        UploadPolicy {
            max_file_size: mb_to_bytes(self.max_file_size_mb),
            allowed_extensions,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size(),
            client_quota_mb: default_client_quota(),
            global_quota_mb: 0,
            max_file_count: default_max_file_count(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

/// Upload rate limiting.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    /// Whether upload rate limiting is enforced.
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    /// Sliding window width in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Uploads admitted per window.
    #[serde(default = "default_max_uploads")]
    pub max_uploads: u32,
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_uploads() -> u32 {
    10
}

impl RateLimitSection {
    /// Convert to the limiter's configuration.
    pub fn limiter_config(&self) -> RateLimitConfig {
        let config = RateLimitConfig::new(self.max_uploads, self.window_secs);
        if self.enabled {
            config
        } else {
            config.disabled()
        }
    }
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            window_secs: default_window_secs(),
            max_uploads: default_max_uploads(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/coursedrop.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Filesystem locations.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Storage limits.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upload rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Read an environment variable, ignoring empty or unparsable values.
fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, "Ignoring unparsable environment override");
            None
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(CourseDropError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| CourseDropError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `COURSEDROP_UPLOAD_DIR`
    /// - `COURSEDROP_TOKEN_FILE`
    /// - `COURSEDROP_MAX_FILE_SIZE_MB`
    /// - `COURSEDROP_CLIENT_QUOTA_MB`
    /// - `COURSEDROP_GLOBAL_QUOTA_MB`
    /// - `COURSEDROP_RATE_LIMIT` (uploads per window)
    /// - `COURSEDROP_LOG_LEVEL`
    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_value::<String>("COURSEDROP_UPLOAD_DIR") {
            self.paths.upload_dir = dir;
        }
        if let Some(file) = env_value::<String>("COURSEDROP_TOKEN_FILE") {
            self.paths.token_file = file;
        }
        if let Some(mb) = env_value("COURSEDROP_MAX_FILE_SIZE_MB") {
            self.storage.max_file_size_mb = mb;
        }
        if let Some(mb) = env_value("COURSEDROP_CLIENT_QUOTA_MB") {
            self.storage.client_quota_mb = mb;
        }
        if let Some(mb) = env_value("COURSEDROP_GLOBAL_QUOTA_MB") {
            self.storage.global_quota_mb = mb;
        }
        if let Some(limit) = env_value("COURSEDROP_RATE_LIMIT") {
            self.rate_limit.max_uploads = limit;
        }
        if let Some(level) = env_value::<String>("COURSEDROP_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let storage = &self.storage;

        if self.paths.upload_dir.trim().is_empty() {
            return Err(CourseDropError::Config("paths.upload_dir is empty".to_string()));
        }
        if self.paths.token_file.trim().is_empty() {
            return Err(CourseDropError::Config("paths.token_file is empty".to_string()));
        }
        if storage.max_file_size_mb == 0 || storage.client_quota_mb == 0 {
            return Err(CourseDropError::Config(
                "storage.max_file_size_mb and storage.client_quota_mb must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("storage.max_file_size_mb", storage.max_file_size_mb),
            ("storage.client_quota_mb", storage.client_quota_mb),
            ("storage.global_quota_mb", storage.global_quota_mb),
        ] {
            if value > MAX_SIZE_MB {
                return Err(CourseDropError::Config(format!(
                    "{name} ({value}) exceeds the maximum of {MAX_SIZE_MB}"
                )));
            }
        }
        if storage.max_file_size_mb > storage.client_quota_mb {
            return Err(CourseDropError::Config(format!(
                "storage.max_file_size_mb ({}) exceeds storage.client_quota_mb ({})",
                storage.max_file_size_mb, storage.client_quota_mb
            )));
        }
        if storage.max_file_count == 0 {
            return Err(CourseDropError::Config(
                "storage.max_file_count must be positive".to_string(),
            ));
        }
        if storage.upload_policy().allowed_extensions.is_empty() {
            return Err(CourseDropError::Config(
                "storage.allowed_extensions is empty".to_string(),
            ));
        }
        if self.rate_limit.enabled
            && (self.rate_limit.window_secs == 0 || self.rate_limit.max_uploads == 0)
        {
            return Err(CourseDropError::Config(
                "rate_limit.window_secs and rate_limit.max_uploads must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Storage root as a path.
    pub fn upload_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.upload_dir)
    }

    /// Credential store location as a path.
    pub fn token_file(&self) -> PathBuf {
        PathBuf::from(&self.paths.token_file)
    }
}
