//! Middleware for Web API.

pub mod cors;
pub mod credential;
pub mod rate_limit;
pub mod security;

pub use cors::create_cors_layer;
pub use credential::{Credential, AUTH_TOKEN_HEADER};
pub use rate_limit::{ip_throttle, IpThrottle};
pub use security::security_headers;
