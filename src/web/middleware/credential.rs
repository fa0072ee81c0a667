//! Credential extraction.

use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};

/// Header carrying the client credential.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// The credential presented with a request, if any.
///
/// Read from `X-Auth-Token`, falling back to `Authorization: Bearer`.
/// Extraction never fails; a missing credential is denied by the admission
/// pipeline so every operation reports it the same way.
#[derive(Debug, Clone, Default)]
pub struct Credential(pub Option<String>);

impl Credential {
    /// The credential as a string slice.
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }

    fn from_headers(headers: &HeaderMap) -> Self {
        let token = headers
            .get(AUTH_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .or_else(|| {
                headers
                    .get(AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.strip_prefix("Bearer "))
                    .map(str::trim)
                    .filter(|token| !token.is_empty())
            });

        Credential(token.map(str::to_string))
    }
}

impl<S> FromRequestParts<S> for Credential
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        _state: &'life1 S,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self, Self::Rejection>> + Send + 'async_trait>,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move { Ok(Credential::from_headers(&parts.headers)) })
    }
}
