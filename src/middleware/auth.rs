//! Credential gate
//!
//! Decides which provider key a call is forwarded with. A caller key wins;
//! otherwise the server-side key for the provider is used. Secret values are
//! never logged, only a short fingerprint.

use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{config::Config, error::AppError, proxy::route::ProviderId};

/// Where the forwarded key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Caller,
    Server,
}

/// Key the outbound call authenticates with
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub key: String,
    pub source: CredentialSource,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("key", &fingerprint(&self.key))
            .field("source", &self.source)
            .finish()
    }
}

/// Why a call was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    MissingCredential,
    InvalidAccessCode,
}

/// Outcome of the credential gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allow(Credential),
    Deny(DenyReason),
}

impl AuthDecision {
    /// Convert into a result for the handler chain
    pub fn into_result(self, provider: ProviderId) -> Result<Credential, AppError> {
        match self {
            AuthDecision::Allow(credential) => Ok(credential),
            AuthDecision::Deny(DenyReason::MissingCredential) => {
                Err(AppError::MissingCredential(provider.name()))
            }
            AuthDecision::Deny(DenyReason::InvalidAccessCode) => Err(AppError::InvalidAccessCode),
        }
    }
}

/// Extract the Authorization header and return the bearer token
///
/// A bare `Bearer` scheme yields an empty token.
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    let rest = auth_header.strip_prefix("Bearer")?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// Short, non-reversible identifier for a secret
pub fn fingerprint(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}

/// Credential presented by the caller, if any
///
/// The provider key header is consulted first, then `Authorization`.
/// Whitespace-only values count as absent.
pub fn caller_credential(headers: &HeaderMap, provider: ProviderId) -> Option<String> {
    let from_key_header = headers
        .get(provider.key_header())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let from_authorization = || {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| extract_bearer_token(v.trim()).unwrap_or(v).trim())
            .filter(|v| !v.is_empty())
    };

    from_key_header.or_else(from_authorization).map(str::to_string)
}

/// Decide whether a call may proceed and with which key
pub fn authenticate(headers: &HeaderMap, provider: ProviderId, config: &Config) -> AuthDecision {
    let presented = caller_credential(headers, provider);
    let server_key = provider
        .server_key(config)
        .map(str::trim)
        .filter(|k| !k.is_empty());

    let decision = if config.access_codes.is_empty() {
        match (presented, server_key) {
            (Some(key), _) => AuthDecision::Allow(Credential {
                key,
                source: CredentialSource::Caller,
            }),
            (None, Some(key)) => AuthDecision::Allow(Credential {
                key: key.to_string(),
                source: CredentialSource::Server,
            }),
            (None, None) => AuthDecision::Deny(DenyReason::MissingCredential),
        }
    } else {
        match presented {
            None if server_key.is_none() => AuthDecision::Deny(DenyReason::MissingCredential),
            Some(code) if config.access_codes.iter().any(|c| *c == code) => match server_key {
                Some(key) => AuthDecision::Allow(Credential {
                    key: key.to_string(),
                    source: CredentialSource::Server,
                }),
                None => AuthDecision::Deny(DenyReason::MissingCredential),
            },
            Some(key) => AuthDecision::Allow(Credential {
                key,
                source: CredentialSource::Caller,
            }),
            None => AuthDecision::Deny(DenyReason::InvalidAccessCode),
        }
    };

    match &decision {
        AuthDecision::Allow(c) => debug!(
            provider = provider.name(),
            source = ?c.source,
            key_fingerprint = %fingerprint(&c.key),
            "Credential accepted"
        ),
        AuthDecision::Deny(reason) => debug!(
            provider = provider.name(),
            reason = ?reason,
            "Credential denied"
        ),
    }

    decision
}
