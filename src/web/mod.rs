//! HTTP API for coursedrop.
//!
//! A thin axum layer over the admission pipeline: handlers extract the
//! credential and request data, run the pipeline on the blocking pool and
//! map denials to status codes.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod server;

pub use error::ApiError;
pub use router::create_router;
pub use server::WebServer;
