//! Client identities and credential resolution.
//!
//! The [`IdentityStore`] re-reads its [`CredentialSource`] on every call, so
//! a rotated or revoked credential takes effect on the very next request.
//! Any failure to read the source resolves to "no match".

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::token::TokenMap;
use crate::Result;

/// Maximum length of a client identifier (in characters).
pub const MAX_CLIENT_ID_LENGTH: usize = 32;

/// Reasons a raw identifier is not a valid [`ClientId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientIdError {
    /// Nothing left after trimming.
    #[error("client id is empty")]
    Empty,
    /// Longer than [`MAX_CLIENT_ID_LENGTH`].
    #[error("client id is {len} characters long (max {max})")]
    TooLong { len: usize, max: usize },
    /// Contains something other than ASCII letters and digits.
    #[error("client id contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Stable, normalized client identifier (e.g. an institutional NetID).
///
/// Normalized form is trimmed and lower-cased, ASCII alphanumeric only and
/// at most [`MAX_CLIENT_ID_LENGTH`] characters. It doubles as the name of
/// the client's storage directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Normalize and validate a raw identifier.
    pub fn parse(raw: &str) -> std::result::Result<Self, ClientIdError> {
        let normalized = raw.trim().to_lowercase();

        if normalized.is_empty() {
            return Err(ClientIdError::Empty);
        }

        if let Some(c) = normalized.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(ClientIdError::InvalidCharacter(c));
        }

        let len = normalized.chars().count();
        if len > MAX_CLIENT_ID_LENGTH {
            return Err(ClientIdError::TooLong {
                len,
                max: MAX_CLIENT_ID_LENGTH,
            });
        }

        Ok(Self(normalized))
    }

    /// The normalized identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClientId {
    type Err = ClientIdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Backing representation of the credential mapping (client id -> credential).
pub trait CredentialSource: Send + Sync {
    /// Read the current mapping.
    fn load(&self) -> Result<TokenMap>;
}

impl CredentialSource for TokenMap {
    fn load(&self) -> Result<TokenMap> {
        Ok(self.clone())
    }
}

/// Short, non-reversible fingerprint of a credential for log correlation.
pub fn fingerprint(credential: &str) -> String {
    let digest = Sha256::digest(credential.as_bytes());
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}

/// Resolves presented credentials to client identities.
pub struct IdentityStore {
    source: Box<dyn CredentialSource>,
}

impl IdentityStore {
    /// Create an identity store reading from `source`.
    pub fn new(source: impl CredentialSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Resolve a credential to the client it belongs to.
    ///
    /// Reloads the mapping and scans it in client-id order; the first entry
    /// whose credential matches wins. Returns `None` for unknown or empty
    /// credentials and whenever the source cannot be read.
    pub fn resolve(&self, credential: &str) -> Option<ClientId> {
        if credential.is_empty() {
            return None;
        }

        let tokens = match self.source.load() {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(error = %e, "Credential store unreadable, denying request");
                return None;
            }
        };

        let (raw_id, _) = tokens.iter().find(|(_, stored)| stored.as_str() == credential)?;

        match ClientId::parse(raw_id) {
            Ok(id) => {
                tracing::debug!(client = %id, "Credential resolved");
                Some(id)
            }
            Err(e) => {
                tracing::error!(raw_id = %raw_id, error = %e, "Credential store holds malformed client id");
                None
            }
        }
    }
}

impl fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityStore").finish_non_exhaustive()
    }
}
